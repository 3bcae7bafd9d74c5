// SPDX-License-Identifier: MIT

use async_trait::async_trait;

use super::ValidationStrategy;
use crate::error::IevError;
use crate::node::NodeContext;
use crate::repair::Record;
use crate::schema::OutputSchema;

/// Any schema violation is fatal
#[derive(Debug, Default, Clone, Copy)]
pub struct Strict;

#[async_trait]
impl ValidationStrategy for Strict {
    fn name(&self) -> &str {
        "strict"
    }

    async fn validate(
        &self,
        record: Record,
        schema: &OutputSchema,
        cx: &mut NodeContext,
    ) -> Result<Record, IevError> {
        let violations = schema.validate(&record);
        if violations.is_empty() {
            Ok(record)
        } else {
            Err(IevError::validation(cx.node_name(), violations))
        }
    }
}
