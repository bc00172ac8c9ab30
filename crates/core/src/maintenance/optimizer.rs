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

//! Periodic background loop: commit then optimize the `main` collection.
//! Never terminates voluntarily; on error the handle is discarded and
//! rebuilt on the next tick rather than retried in place.

use std::time::Duration;

use crate::config::OptimizerConfig;
use crate::index_client::{Collection, IndexClient};

pub struct Optimizer {
    config: OptimizerConfig,
}

impl Optimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    pub async fn run(self) -> ! {
        loop {
            tokio::time::sleep(Duration::from_secs(self.config.sleep_seconds)).await;

            match self.tick().await {
                Ok(()) => {}
                Err(e) => {
                    tracing::error!(error = %e, "optimizer tick failed, backing off");
                    tokio::time::sleep(Duration::from_secs(self.config.error_sleep_seconds)).await;
                }
            }
        }
    }

    async fn tick(&self) -> crate::Result<()> {
        let index = IndexClient::new(self.config.index.clone(), 0, Duration::from_secs(30))?;
        index.commit(Collection::Main).await?;
        index.optimize(Collection::Main).await?;
        Ok(())
    }
}
