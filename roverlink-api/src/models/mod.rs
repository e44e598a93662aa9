mod claim;
mod provisioning;
mod status;
mod wifi;

pub use claim::*;
pub use provisioning::*;
pub use status::*;
pub use wifi::*;
