//! Capability context.
//!
//! The [`Cx`] type is the token every operation in the crate takes to learn
//! who is asking (task identity), whether the asker still wants the answer
//! (cancellation) and where new work should run (the runtime handle).
//!
//! There is no ambient runtime: spawning, sleeping and every cancel-aware
//! suspension point reach the runtime through an explicit `Cx`.
//!
//! ```ignore
//! use taskweave::Cx;
//!
//! async fn refresh(cx: &Cx) -> taskweave::Result<()> {
//!     cx.checkpoint()?;
//!     let handle = cx.spawn(|cx| async move { load(&cx).await })?;
//!     handle.join(cx).await?;
//!     Ok(())
//! }
//! ```

#[allow(clippy::module_inception)]
pub mod cx;

pub use cx::Cx;
