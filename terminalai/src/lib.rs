//! Terminal AI assistant: drives a shell toward a natural-language goal.
//!
//! A remote model proposes one command per turn; the loop runs it through a
//! guarded shell executor, records what happened, and asks again until the
//! goal is confirmed complete, the user stops it, or the step budget runs out.
//!
//! - **[`core`]**: Pure, deterministic logic (decision coercion, context
//!   windowing, classification, phase gating). No I/O.
//! - **[`io`]**: Side effects (processes, shells, HTTP, config files, the
//!   audit log, the console). Behind traits where tests need fakes.
//!
//! [`agent_loop`] wires the two together; [`collaborators`] are the hooks a
//! front end supplies for questions and confirmations.

pub mod agent_loop;
pub mod collaborators;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
