use std::path::Path;

use async_trait::async_trait;
use harvest_fetch::TransferResult;

use super::{StrategyHandler, StrategyKind};
use crate::config::Target;
use crate::context::AcquireContext;
use crate::error::Result;

/// Targets acquired by hand, or not at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoneHandler;

#[async_trait]
impl StrategyHandler for NoneHandler {
    fn kind(&self) -> StrategyKind { StrategyKind::None }

    async fn run(&self, _ctx: &AcquireContext, _target: &Target, _out_dir: &Path) -> Result<Vec<TransferResult>> {
        Ok(vec![TransferResult::noop("no download configured")])
    }
}
