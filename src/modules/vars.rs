use anyhow::Result;
use async_trait::async_trait;

use crate::pipeline::{Response, Transformer};
use crate::store::DataStore;

/// Substitutes `$name` tokens in outbound text with a random value
/// from the variable store. Unknown variables pass through untouched.
pub struct VariableTransformer {
    store: DataStore,
}

impl VariableTransformer {
    pub fn new(store: DataStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Transformer for VariableTransformer {
    fn name(&self) -> &str {
        "vars"
    }

    async fn transform(&self, mut response: Response) -> Result<Response> {
        if !response.text.contains('$') {
            return Ok(response);
        }

        let mut out = String::with_capacity(response.text.len());
        let mut rest = response.text.as_str();
        while let Some(pos) = rest.find('$') {
            out.push_str(&rest[..pos]);
            let after = &rest[pos + 1..];
            let name_len = after
                .find(|c: char| !c.is_ascii_alphanumeric() && c != '_')
                .unwrap_or(after.len());
            if name_len == 0 {
                out.push('$');
                rest = after;
                continue;
            }
            let name = &after[..name_len];
            match self.store.get_random(name).await? {
                Some(record) => out.push_str(&record.value),
                None => {
                    out.push('$');
                    out.push_str(name);
                }
            }
            rest = &after[name_len..];
        }
        out.push_str(rest);

        response.text = out;
        Ok(response)
    }
}
