use crate::RetrievedChunk;

/// The single prompt used by both the one-shot and the chat front ends.
pub const DEFAULT_PROMPT_TEMPLATE: &str = "
Use the pieces of information provided in the context to answer the user's question.
If you don't know the answer, just say that you don't know. Don't try to make up an answer.
Don't provide anything outside the given context.

Context: {context}
Question: {question}

Start the answer directly. No small talk, please.
";

const CONTEXT_SLOT: &str = "{context}";
const QUESTION_SLOT: &str = "{question}";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    template: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self {
            template: DEFAULT_PROMPT_TEMPLATE.to_string(),
        }
    }
}

impl PromptTemplate {
    /// Returns `None` unless the template has both a `{context}` and a
    /// `{question}` slot.
    pub fn new(template: impl Into<String>) -> Option<Self> {
        let template = template.into();
        (template.contains(CONTEXT_SLOT) && template.contains(QUESTION_SLOT))
            .then_some(Self { template })
    }

    pub fn as_str(&self) -> &str {
        &self.template
    }

    /// Fills both slots in one pass over the template, so neither the
    /// context nor the question is scanned for slot markers.
    pub fn render(&self, context: &str, question: &str) -> String {
        let mut prompt =
            String::with_capacity(self.template.len() + context.len() + question.len());
        let mut rest = self.template.as_str();

        loop {
            let next = [(CONTEXT_SLOT, context), (QUESTION_SLOT, question)]
                .into_iter()
                .filter_map(|(slot, value)| rest.find(slot).map(|at| (at, slot, value)))
                .min_by_key(|(at, _, _)| *at);

            let Some((at, slot, value)) = next else {
                prompt.push_str(rest);
                return prompt;
            };
            prompt.push_str(&rest[..at]);
            prompt.push_str(value);
            rest = &rest[at + slot.len()..];
        }
    }

    pub fn render_with_sources(&self, sources: &[RetrievedChunk], question: &str) -> String {
        self.render(&stuff_context(sources), question)
    }
}

/// Concatenates retrieved chunk texts, separated by a blank line.
pub fn stuff_context(sources: &[RetrievedChunk]) -> String {
    sources
        .iter()
        .map(|source| source.chunk.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TextChunk;

    fn retrieved(text: &str) -> RetrievedChunk {
        RetrievedChunk {
            chunk: TextChunk {
                chunk_id: text.to_string(),
                source_path: "a.pdf".to_string(),
                file_name: "a.pdf".to_string(),
                page: 1,
                chunk_index: 0,
                text: text.to_string(),
            },
            score: 1.0,
        }
    }

    #[test]
    fn default_template_forbids_fabrication() {
        let template = PromptTemplate::default();
        assert!(template.as_str().contains("just say that you don't know"));
        assert!(template.as_str().contains("Don't try to make up an answer"));
    }

    #[test]
    fn render_fills_both_slots() {
        let prompt = PromptTemplate::default()
            .render_with_sources(&[retrieved("first"), retrieved("second")], "Why?");

        assert!(prompt.contains("Context: first\n\nsecond\nQuestion: Why?"));
        assert!(!prompt.contains("{context}"));
        assert!(!prompt.contains("{question}"));
    }

    #[test]
    fn question_braces_are_not_substituted() {
        let prompt = PromptTemplate::default().render("ctx", "what is {context}?");
        assert!(prompt.contains("Question: what is {context}?"));
    }

    #[test]
    fn context_braces_are_not_substituted() {
        let prompt = PromptTemplate::default().render("see the {question} field", "Q?");
        assert!(prompt.contains("Context: see the {question} field\nQuestion: Q?"));
        assert_eq!(prompt.matches("Q?").count(), 1);
    }

    #[test]
    fn repeated_slots_are_all_filled() {
        let template =
            PromptTemplate::new("{question} | {context} | {question}").expect("template");
        assert_eq!(template.render("c", "q"), "q | c | q");
    }

    #[test]
    fn template_needs_both_slots() {
        assert!(PromptTemplate::new("only {context}").is_none());
        assert!(PromptTemplate::new("{context} / {question}").is_some());
    }
}
