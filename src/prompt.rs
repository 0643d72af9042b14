use crate::memory::ConversationTurn;

pub(crate) const DEFAULT_HISTORY_WINDOW: usize = 10;

/// Topic policy handed to the model ahead of the conversation context.
///
/// The model alone decides whether a request is in scope; nothing on this side
/// classifies the message.
const POLICY: &str = r#"You are an AI assistant for EDUCATION and HEALTHCARE.

EDUCATION - COMPLETELY OPEN:
- Answer ANY question that could be considered educational
- No restrictions on educational topics
- Include: all academic subjects, technology, science, math, history, literature, programming, AI, Machine Learning (ML), ML algorithms, deep learning, neural networks, data science, computer science, definitions, explanations, tutorials, learning methods, career guidance, research, teaching, student skills, and ANY topic that teaches or explains something
- Machine Learning (ML) is a key educational topic - answer all ML questions
- If someone asks about ANY topic that could be educational, answer it
- Be very broad in what you consider educational
- Only say "study first" for clearly non-educational topics like entertainment, sports, politics, or personal gossip

HEALTHCARE:
- Answer all health and medical questions
- Include: wellness, nutrition, exercise, mental health, medical conditions, preventive care

RESTRICTIONS (ONLY for clearly non-educational topics):
- Only restrict: politics, entertainment, sports, personal gossip, non-educational personal advice
- For ANY educational content: ANSWER IT
- For ANY healthcare content: ANSWER IT"#;

const CLOSING: &str = r#"IMPORTANT: If this question could be considered educational or healthcare-related in ANY way, provide a detailed answer. Only use the "study first" response for clearly non-educational topics like entertainment or politics."#;

/// Builds the single text prompt sent to the provider.
#[derive(Debug, Clone)]
pub struct PromptComposer {
    history_window: usize,
}

impl Default for PromptComposer {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_WINDOW)
    }
}

impl PromptComposer {
    pub fn new(history_window: usize) -> Self {
        Self { history_window }
    }

    pub fn history_window(&self) -> usize {
        self.history_window
    }

    /// Render the most recent turns as `role: content` lines.
    pub fn render_context(&self, turns: &[ConversationTurn]) -> String {
        let start = turns.len().saturating_sub(self.history_window);
        turns[start..]
            .iter()
            .map(|turn| format!("{}: {}", turn.role, turn.content))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Interpolate the recent history and `message` into the policy template.
    ///
    /// `turns` is the conversation as the caller wants the model to see it,
    /// normally including the pending user turn for `message`. User content is
    /// inserted verbatim.
    pub fn compose(&self, turns: &[ConversationTurn], message: &str) -> String {
        let context = self.render_context(turns);

        let mut prompt = String::with_capacity(POLICY.len() + CLOSING.len() + context.len() + message.len() + 96);
        prompt.push_str(POLICY);
        prompt.push_str("\n\nHere is our recent conversation history:\n");
        prompt.push_str(&context);
        prompt.push_str("\n\nCurrent Question/Request: ");
        prompt.push_str(message);
        prompt.push_str("\n\n");
        prompt.push_str(CLOSING);

        prompt
    }
}
