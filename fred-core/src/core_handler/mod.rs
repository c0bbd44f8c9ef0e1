/*
    Handler subsystem - entry points that tie store, replication and name service together

    - ExternalHandler: requests from clients of this node. Applies locally,
      then relays to peer replicas.
    - InternalHandler: requests from peer nodes. Applies locally, never relays.
*/

pub mod external;
pub mod internal;

pub use external::ExternalHandler;
pub use internal::InternalHandler;

use crate::core_replication::NameService;
use crate::core_types::{Expiry, FredResult, KeygroupName};

/// Expiry `node` applies to `keygroup`. A node that is not (yet) a declared
/// member uses `fallback`.
async fn member_expiry(
    ns: &dyn NameService,
    keygroup: &KeygroupName,
    node: &str,
    fallback: Expiry,
) -> FredResult<Expiry> {
    match ns.get_expiry(keygroup, node).await {
        Ok(expiry) => Ok(expiry),
        Err(e) if e.is_not_found() => Ok(fallback),
        Err(e) => Err(e),
    }
}
