// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The seven solver strategies. All of them operate on the shared
//! [`crate::context::Context`], respect the same wall-clock deadline and
//! solution cap, and produce solutions through the same acceptance path,
//! so their results are directly comparable and mergeable.

pub mod backtrack;
pub mod cost_guided;
pub mod diverse;
pub mod dynamic;
pub mod forward;
pub mod restart;
pub mod rng;
pub mod two_phase;
