// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

use crate::block::BlockId;
use thiserror::Error;

/// Defects in a method's block graph. None of these describe a translatable program.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("entry block {0} does not exist")]
    MissingEntry(BlockId),
    #[error("block {0} is defined more than once")]
    DuplicateBlock(BlockId),
    #[error("block {block} jumps to undefined block {target}")]
    MissingSuccessor { block: BlockId, target: BlockId },
    #[error("block {block} has {found} successors but its terminator implies {expected}")]
    SuccessorMismatch {
        block: BlockId,
        expected: usize,
        found: usize,
    },
    #[error("block {0} contains a branch or return before its last instruction")]
    MisplacedTerminator(BlockId),
    #[error("blocks {0:?} cannot be reached from any entry of their region")]
    UnplacedBlocks(Vec<BlockId>),
}
