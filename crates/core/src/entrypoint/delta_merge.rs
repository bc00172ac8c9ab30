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

use std::sync::Arc;
use std::time::Duration;

use crate::config::DeltaMergeConfig;
use crate::index_client::IndexClient;
use crate::maintenance::DeltaMerge;

pub async fn run(config: DeltaMergeConfig) -> crate::Result<()> {
    let index = Arc::new(IndexClient::new(config.index, 0, Duration::from_secs(30))?);
    DeltaMerge::new(index, config.rows_per_iteration, config.rebooster_page_size)
        .run_once()
        .await
}
