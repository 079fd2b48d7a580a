//! Plain SQL, one function per statement. Callers pass a `&DbPool`.

pub mod executions;
pub mod workflows;
