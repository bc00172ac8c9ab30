// Stract is an open source web search engine.
// Copyright (C) 2023 Stract ApS
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as
// published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! The index-maintenance toolchain: three independent loops/one-shots
//! that keep `main` fresh and well-boosted without ever touching the
//! crawl side of the system.

pub mod delta_merge;
pub mod optimizer;
pub mod rebooster;

pub use delta_merge::DeltaMerge;
pub use optimizer::Optimizer;
pub use rebooster::Rebooster;
