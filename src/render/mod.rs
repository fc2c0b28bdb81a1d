//! Render items and their conversion into engine input.
//!
//! A [`RenderItem`] arrives from the host with timing, pitch and envelope
//! data already computed. [`build`] packages it into an [`EngineInput`]
//! without performing any I/O.
//!
//! [`EngineInput`]: crate::contract::EngineInput

pub mod builder;
pub mod item;
pub mod note;

pub use builder::{build, pack_envelope, ENVELOPE_POINTS};
pub use item::{EnvelopePoint, OtoTiming, RenderItem};
pub use note::note_string;
