pub mod cursor;
pub mod decode;
pub mod params;
pub mod special;

pub use cursor::{connect, execute, PgConnector, PgCursor};
pub use decode::{decode_cell, PgMoney, PgNumeric, PgRaw};
pub use params::QueryParam;
pub use special::{PgInet, PgInterval, PgMacAddr, PgTimeTz, PgUnsigned};
