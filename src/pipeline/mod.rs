//! Pipeline stages for turning a bill page image into reconciled line items.
//!
//! Each submodule implements exactly one transformation step. Keeping stages
//! separate makes each independently testable and lets us tune one heuristic
//! (say, the salvage window) without touching the others.
//!
//! ## Data Flow
//!
//! ```text
//! encode ──▶ provider ──▶ recover ──▶ validate ──▶ reconcile ──▶ (retry)
//! (base64)   (vision)     (cascade)   (normalize    (sum vs      (≤ 1 round
//!                                      + guard)      claimed)     trip)
//! ```
//!
//! 1. [`encode`]      — PNG-encode and base64-wrap each page image for the
//!    multimodal request body
//! 2. [`recover`]     — layered cascade that extracts a well-shaped result
//!    from the model's raw (possibly malformed) text; never raises
//! 3. [`normalize`]   — exact-decimal number parsing and item-name cleanup
//! 4. [`guard`]       — remove totals/taxes/discounts disguised as items
//! 5. [`validate`]    — one cleaning pass composing the normalisers, the
//!    arithmetic self-check, and the guard
//! 6. [`reconcile`]   — compare the computed sum against the claimed total
//! 7. [`orchestrate`] — the per-page state machine, including the bounded
//!    corrective retry; the only stage that talks to the provider

pub mod encode;
pub mod guard;
pub mod normalize;
pub mod orchestrate;
pub mod reconcile;
pub mod recover;
pub mod validate;
