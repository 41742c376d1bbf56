use tracing::{debug, warn};

use crate::memory::ConversationMemory;
use crate::models::{Message, RetrievedSnippet};
use crate::retriever::Retriever;

pub const CONTEXT_PREFIX: &str = "Latest Context: ";
pub const USER_INPUT_PREFIX: &str = "User Input: ";

/// Builds the ordered message list sent to the completion API:
/// system instruction, memory window, retrieved context, then the new input.
#[derive(Debug, Clone)]
pub struct PromptAssembler {
    system_message: Message,
    memory_window: usize,
}

impl PromptAssembler {
    pub fn new(system_prompt: impl Into<String>, memory_window: usize) -> Self {
        Self {
            system_message: Message::system(system_prompt),
            memory_window,
        }
    }

    pub fn system_message(&self) -> &Message {
        &self.system_message
    }

    pub async fn assemble(
        &self,
        user_text: &str,
        memory: &ConversationMemory,
        retriever: &dyn Retriever,
    ) -> Vec<Message> {
        let window = memory.window(self.memory_window);

        // Retrieval is best-effort context.
        let context = match retriever.search(user_text).await {
            Ok(snippets) => snippets,
            Err(e) => {
                warn!("Retrieval failed, continuing without context: {}", e);
                Vec::new()
            }
        };

        let mut messages = Vec::with_capacity(window.len() + context.len() + 2);
        messages.push(self.system_message.clone());
        messages.extend_from_slice(window);
        messages.extend(context.iter().map(context_message));
        messages.push(Message::user(format!("{USER_INPUT_PREFIX}{user_text}")));

        debug!(
            memory = window.len(),
            context = context.len(),
            total = messages.len(),
            chars = Message::content_len_total(&messages),
            "Assembled prompt"
        );

        messages
    }
}

fn context_message(snippet: &RetrievedSnippet) -> Message {
    Message::assistant(format!("{CONTEXT_PREFIX}{}", snippet.text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChatError;
    use crate::models::Role;
    use crate::retriever::{MockRetriever, NoRetrieval};

    fn assembler() -> PromptAssembler {
        PromptAssembler::new("You are a sales assistant.", 6)
    }

    #[tokio::test]
    async fn test_empty_memory_and_no_context() {
        let messages = assembler()
            .assemble("Hello", &ConversationMemory::new(), &NoRetrieval)
            .await;

        assert_eq!(
            messages,
            vec![
                Message::system("You are a sales assistant."),
                Message::user("User Input: Hello"),
            ]
        );
    }

    #[tokio::test]
    async fn test_order_is_system_memory_context_input() {
        let mut memory = ConversationMemory::new();
        for i in 0..5 {
            memory.append(&format!("q{i}"), &format!("a{i}"));
        }

        let mut retriever = MockRetriever::new();
        retriever
            .expect_search()
            .times(1)
            .returning(|query| {
                assert_eq!(query, "Any serums?");
                Ok(vec![
                    RetrievedSnippet::new("Serum A", 0.9),
                    RetrievedSnippet::new("Serum B", 0.7),
                ])
            });

        let messages = assembler()
            .assemble("Any serums?", &memory, &retriever)
            .await;

        assert_eq!(messages.len(), 1 + 6 + 2 + 1);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1].content, "Previous User Input: q2");
        assert_eq!(messages[6].content, "a4");
        assert_eq!(messages[7], Message::assistant("Latest Context: Serum A"));
        assert_eq!(messages[8], Message::assistant("Latest Context: Serum B"));
        assert_eq!(messages[9], Message::user("User Input: Any serums?"));

        // Memory is read, never mutated.
        assert_eq!(memory.len(), 10);
    }

    #[tokio::test]
    async fn test_retrieval_failure_degrades_to_no_context() {
        let mut retriever = MockRetriever::new();
        retriever
            .expect_search()
            .returning(|_| Err(ChatError::Retrieval("index unavailable".to_string())));

        let mut memory = ConversationMemory::new();
        memory.append("Hi", "Hello!");

        let messages = assembler().assemble("Recommend something", &memory, &retriever).await;

        assert_eq!(messages.len(), 4);
        assert!(messages.iter().all(|m| !m.content.starts_with(CONTEXT_PREFIX)));
        assert_eq!(messages.last().unwrap().content, "User Input: Recommend something");
    }

    #[tokio::test]
    async fn test_always_one_system_first_and_one_user_input_last() {
        let mut memory = ConversationMemory::new();
        for input in ["", "multi\nline", "User Input: nested", "ünïcödé"] {
            let messages = assembler().assemble(input, &memory, &NoRetrieval).await;

            assert_eq!(messages.iter().filter(|m| m.role == Role::System).count(), 1);
            assert_eq!(messages[0].role, Role::System);
            let last = messages.last().unwrap();
            assert_eq!(last.role, Role::User);
            assert_eq!(last.content, format!("User Input: {input}"));
            assert!(
                messages[..messages.len() - 1]
                    .iter()
                    .all(|m| !m.content.starts_with(USER_INPUT_PREFIX))
            );

            memory.append(input, "ok");
        }
    }
}
