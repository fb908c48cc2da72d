//! content storage locations and the transports that reach them
//!
//! a warehouse stores serialized wares. readers are chosen by trying a list
//! of warehouses strictly in order; writers stream to a temp location and
//! become visible only on [`WareWriter::commit`].

mod file;
mod http;
mod uri;

use std::io::{Read, Write};

use tracing::debug;

use crate::error::{Error, ErrorKind, Result};
use crate::hash::CommitId;

pub use file::FileWarehouse;
pub use http::HttpWarehouse;
pub use uri::{SiloUri, Transport};

/// one reachable storage location
pub trait Warehouse: Send + Sync {
    fn uri(&self) -> &SiloUri;

    /// check the warehouse can be reached at all
    fn ping(&self) -> Result<()>;

    /// open the stored form of ware `id`
    fn open_reader(&self, id: &CommitId) -> Result<Box<dyn Read + Send>>;

    /// start writing a new ware
    fn open_writer(&self) -> Result<Box<dyn WareWriter>>;
}

/// an in-progress upload
///
/// dropping a writer without committing discards what was written.
pub trait WareWriter: Write + Send {
    /// make the written stream visible as ware `id`
    fn commit(self: Box<Self>, id: &CommitId) -> Result<()>;
}

/// open the transport for a warehouse uri
pub fn open(uri: &SiloUri) -> Result<Box<dyn Warehouse>> {
    match uri.transport() {
        Transport::File => Ok(Box::new(FileWarehouse::new(uri.clone())?)),
        Transport::Http | Transport::Https => Ok(Box::new(HttpWarehouse::new(uri.clone())?)),
    }
}

/// try warehouses in order until `fetch` succeeds
///
/// unreachable warehouses and warehouses that lack the ware are skipped;
/// any other error is returned immediately. when every warehouse has been
/// tried the error says whether any of them was reachable.
pub fn select<T, F>(id: &CommitId, uris: &[SiloUri], mut fetch: F) -> Result<T>
where
    F: FnMut(&SiloUri) -> Result<T>,
{
    let mut reachable = 0;
    for uri in uris {
        match fetch(uri) {
            Ok(found) => {
                debug!(warehouse = %uri, %id, "selected warehouse");
                return Ok(found);
            }
            Err(e) => match e.kind() {
                ErrorKind::WarehouseUnavailable => {
                    debug!(warehouse = %uri, error = %e, "warehouse unavailable, skipping");
                }
                ErrorKind::WareNotFound => {
                    debug!(warehouse = %uri, %id, "ware not in warehouse, skipping");
                    reachable += 1;
                }
                _ => return Err(e),
            },
        }
    }
    Err(Error::WarehousesExhausted {
        id: id.clone(),
        tried: uris.len(),
        reachable,
    })
}

/// open a reader for ware `id` from the first warehouse that has it
pub fn pick_reader(id: &CommitId, uris: &[SiloUri]) -> Result<(SiloUri, Box<dyn Read + Send>)> {
    select(id, uris, |uri| {
        let warehouse = open(uri)?;
        warehouse.ping()?;
        let reader = warehouse.open_reader(id)?;
        Ok((uri.clone(), reader))
    })
}
