use crate::message::{ToolCall, ToolCallFunction};

/// Partial tool call as it appears in one wire record.
///
/// `OpenAI` sends `id` and the function name on the first fragment only and
/// streams `arguments` in pieces addressed by `index`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCallFragment {
    pub index: Option<u32>,
    pub id: Option<String>,
    pub kind: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<String>,
}

/// Index-addressed accumulator for streamed tool calls.
#[derive(Debug, Clone, Default)]
pub struct ToolCallAccumulator {
    calls: Vec<ToolCall>,
}

impl ToolCallAccumulator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.calls.clear();
    }

    #[must_use]
    pub fn calls(&self) -> &[ToolCall] {
        &self.calls
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Merge one fragment. Fragments without an index always start a new call.
    pub fn merge(&mut self, fragment: ToolCallFragment) {
        let existing = fragment
            .index
            .and_then(|index| self.calls.iter_mut().find(|call| call.index == index));

        match existing {
            Some(call) => {
                if call.id.is_none() {
                    call.id = fragment.id;
                }
                if call.kind.is_none() {
                    call.kind = fragment.kind;
                }
                if call.function.name.is_empty() {
                    if let Some(name) = fragment.name {
                        call.function.name = name;
                    }
                }
                if let Some(arguments) = fragment.arguments {
                    call.function.arguments.push_str(&arguments);
                }
            }
            None => {
                let index = fragment.index.unwrap_or_else(|| self.next_free_index());
                self.calls.push(ToolCall {
                    index,
                    id: fragment.id,
                    kind: fragment.kind,
                    function: ToolCallFunction {
                        name: fragment.name.unwrap_or_default(),
                        arguments: fragment.arguments.unwrap_or_default(),
                    },
                });
            }
        }
    }

    fn next_free_index(&self) -> u32 {
        self.calls
            .iter()
            .map(|call| call.index.saturating_add(1))
            .max()
            .unwrap_or(0)
    }
}
