pub mod attribution;
pub mod config;
pub mod diagnostics;
pub mod differencer;
pub mod error;
pub mod exchange;
pub mod external;
pub mod hierarchy;
pub mod ingest;
pub mod moments;
pub mod normalize;
pub mod output;
pub mod pipeline;
pub mod schema;
pub mod segment;
pub mod store;

#[cfg(feature = "python")]
mod python;

pub use error::AhleError;

#[cfg(feature = "python")]
use pyo3::prelude::*;

#[cfg(feature = "python")]
#[pymodule]
fn _core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<python::AhleEngine>()?;
    python::add_schema_exports(m)?;
    Ok(())
}
