//! kiln: incremental execution and caching core for build automation
//!
//! A scheduler hands [`UnitOfWork`]s to a [`WorkExecutor`] instead of running
//! them directly. The executor reuses earlier results when the inputs and the
//! persisted workspace outputs still match, and runs the work otherwise.
//!
//! ```no_run
//! use kiln::{ExecutionContext, ExecutorConfig, UnitOfWork, WorkExecutor};
//!
//! # fn main() -> kiln::Result<()> {
//! let executor = WorkExecutor::new(ExecutorConfig::load()?)?;
//! let work = UnitOfWork::builder("Uppercase", "/src/Foo.txt", |ctx: &ExecutionContext| {
//!     let out = ctx.output_dir().join("Foo.out");
//!     let text = std::fs::read_to_string(ctx.input_artifact())?;
//!     std::fs::write(&out, text.to_uppercase())?;
//!     Ok(vec![out])
//! })
//! .build();
//!
//! let results = executor.create_invocation(&work)?.invoke()?;
//! # let _ = results;
//! # Ok(())
//! # }
//! ```

pub use kiln_cache::*;
pub use kiln_core::{
    BoxError, Error, EventLog, InvocationEvent, InvocationListener, NoopListener, Result,
    TracingListener, WorkDescription,
};
pub use kiln_utils::tracing::init as init_tracing;
