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

pub struct Crawler;

impl Crawler {
    pub fn num_workers() -> usize {
        10
    }

    pub fn user_agent() -> String {
        "OS-SEARCH-ENGINE-CRAWLER".to_string()
    }

    pub fn timeout_seconds() -> u64 {
        10
    }

    pub fn claim_batch_size() -> usize {
        20
    }

    pub fn cooldown_seconds() -> u64 {
        7 * 86400
    }

    pub fn idle_sleep_seconds() -> u64 {
        10
    }
}

pub struct Indexer;

impl Indexer {
    pub fn num_workers() -> usize {
        10
    }

    pub fn idle_sleep_seconds() -> u64 {
        10
    }
}

pub struct LockService;

impl LockService {
    pub fn host() -> String {
        "0.0.0.0".to_string()
    }

    pub fn port() -> u16 {
        4643
    }

    pub fn authkey() -> String {
        "a".to_string()
    }
}

pub struct Optimizer;

impl Optimizer {
    pub fn sleep_seconds() -> u64 {
        5 * 60
    }

    pub fn error_sleep_seconds() -> u64 {
        10 * 60
    }
}

pub struct Rebooster;

impl Rebooster {
    pub fn page_size() -> usize {
        100
    }
}

pub struct DeltaMerge;

impl DeltaMerge {
    pub fn rows_per_iteration() -> usize {
        500
    }
}
