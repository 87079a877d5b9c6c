// Copyright (c) Asymptotic Labs
// SPDX-License-Identifier: Apache-2.0

use block_graph::{GraphError, MethodId};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranslationError {
    /// A construct the lowering does not model. Translation of the method is
    /// abandoned rather than emitting wrong code.
    #[error("unsupported {construct} in {method}: `{instruction}`{}", operand_suffix(.operand_types))]
    Unsupported {
        method: MethodId,
        construct: String,
        instruction: String,
        operand_types: Vec<String>,
    },
    #[error("malformed input: {0}")]
    Malformed(String),
    #[error("internal error: {0}")]
    Internal(String),
    #[error("invalid block graph in {method}: {source}")]
    Graph {
        method: MethodId,
        #[source]
        source: GraphError,
    },
}

impl TranslationError {
    /// The method the error was raised in, when known.
    pub fn method(&self) -> Option<&MethodId> {
        match self {
            TranslationError::Unsupported { method, .. } | TranslationError::Graph { method, .. } => {
                Some(method)
            }
            TranslationError::Malformed(_) | TranslationError::Internal(_) => None,
        }
    }
}

fn operand_suffix(types: &[String]) -> String {
    if types.is_empty() {
        String::new()
    } else {
        format!(" (operand types: {})", types.join(", "))
    }
}

pub type TranslationResult<T> = Result<T, TranslationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_message_lists_operand_types() {
        let err = TranslationError::Unsupported {
            method: MethodId::new("Main", "main"),
            construct: "expression".to_string(),
            instruction: "x = y instanceof A".to_string(),
            operand_types: vec!["A".to_string(), "int".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "unsupported expression in Main.main: `x = y instanceof A` (operand types: A, int)"
        );
        assert_eq!(err.method(), Some(&MethodId::new("Main", "main")));
    }
}
