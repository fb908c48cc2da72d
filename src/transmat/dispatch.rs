use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::hash::CommitId;
use crate::warehouse::SiloUri;

use super::{Arena, MaterializeOptions, ScanOptions, Transmat, TransmatKind};

/// routes each call to the transmat registered for its kind
#[derive(Default)]
pub struct DispatchingTransmat {
    registry: HashMap<TransmatKind, Arc<dyn Transmat>>,
}

impl DispatchingTransmat {
    pub fn new() -> Self {
        Self::default()
    }

    /// register `transmat` for `kind`, replacing any previous registration
    pub fn with(mut self, kind: impl Into<TransmatKind>, transmat: Arc<dyn Transmat>) -> Self {
        self.registry.insert(kind.into(), transmat);
        self
    }

    /// registered kinds, sorted
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.registry.keys().map(TransmatKind::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    fn get(&self, kind: &TransmatKind) -> Result<&Arc<dyn Transmat>> {
        self.registry
            .get(kind)
            .ok_or_else(|| Error::UnknownKind(kind.to_string()))
    }
}

impl Transmat for DispatchingTransmat {
    fn materialize(
        &self,
        kind: &TransmatKind,
        id: &CommitId,
        warehouses: &[SiloUri],
        opts: &MaterializeOptions,
    ) -> Result<Arena> {
        self.get(kind)?.materialize(kind, id, warehouses, opts)
    }

    fn scan(
        &self,
        kind: &TransmatKind,
        path: &Path,
        warehouses: &[SiloUri],
        opts: &ScanOptions,
    ) -> Result<CommitId> {
        self.get(kind)?.scan(kind, path, warehouses, opts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::transmat::standard;
    use crate::workspace::Workspace;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_unknown_kind() {
        let dispatch = DispatchingTransmat::new();
        let err = dispatch
            .scan(&TransmatKind::from("git"), Path::new("/"), &[], &ScanOptions::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(matches!(err, Error::UnknownKind(ref k) if k == "git"));
    }

    #[test]
    fn test_standard_stack_routes_by_kind() {
        let dir = tempdir().unwrap();
        let ws = Workspace::open(&dir.path().join("ws")).unwrap();
        let src = dir.path().join("src");
        fs::create_dir(&src).unwrap();
        fs::write(src.join("f"), "data").unwrap();
        let store = dir.path().join("store");
        fs::create_dir(&store).unwrap();
        let uris = vec![SiloUri::parse(&format!("file+ca://{}", store.display())).unwrap()];

        let stack = standard(&ws);
        assert_eq!(stack.kinds(), vec!["dir", "tar"]);

        let tar = TransmatKind::from("tar");
        let id = stack.scan(&tar, &src, &uris, &ScanOptions::default()).unwrap();
        assert!(store.join(id.as_str()).is_file());

        let arena = stack
            .materialize(&tar, &id, &uris, &MaterializeOptions::default())
            .unwrap();
        assert_eq!(arena.path(), ws.committed(&id));

        // the dir and tar forms of the same tree share an id
        let dir_kind = TransmatKind::from("dir");
        assert_eq!(
            stack.scan(&dir_kind, &src, &[], &ScanOptions::default()).unwrap(),
            id
        );

        // second materialize is served from the cache even with no warehouses
        let again = stack
            .materialize(&tar, &id, &[], &MaterializeOptions::default())
            .unwrap();
        assert_eq!(again.path(), arena.path());
    }
}
