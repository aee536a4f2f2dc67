use foreman_core::Dialogue;
use serde::{Deserialize, Serialize};

/// Structured context injected ahead of the prompt on dispatch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchContext {
    /// What the execution should achieve.
    #[serde(default)]
    pub goals: Vec<String>,
    /// Hard constraints the executor must respect.
    #[serde(default)]
    pub constraints: Vec<String>,
    /// Assumptions the caller has already made.
    #[serde(default)]
    pub assumptions: Vec<String>,
    /// Prior memories relevant to this work, populated from the memory
    /// store just before dispatch.
    #[serde(default)]
    pub relevant_memories: Vec<String>,
    /// Files assigned to this execution.
    #[serde(default)]
    pub file_assignments: Vec<String>,
}

impl DispatchContext {
    /// Creates an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the goals.
    pub fn with_goals(mut self, goals: Vec<String>) -> Self {
        self.goals = goals;
        self
    }

    /// Sets the constraints.
    pub fn with_constraints(mut self, constraints: Vec<String>) -> Self {
        self.constraints = constraints;
        self
    }

    /// Sets the assumptions.
    pub fn with_assumptions(mut self, assumptions: Vec<String>) -> Self {
        self.assumptions = assumptions;
        self
    }

    /// Sets the file assignments.
    pub fn with_files(mut self, files: Vec<String>) -> Self {
        self.file_assignments = files;
        self
    }

    fn section(out: &mut String, title: &str, items: &[String]) {
        if items.is_empty() {
            return;
        }
        out.push_str(title);
        out.push('\n');
        for item in items {
            out.push_str("- ");
            out.push_str(item);
            out.push('\n');
        }
        out.push('\n');
    }

    /// Renders the context block, skipping empty sections.
    pub fn render(&self) -> String {
        let mut out = String::new();
        Self::section(&mut out, "Goals:", &self.goals);
        Self::section(&mut out, "Constraints:", &self.constraints);
        Self::section(&mut out, "Assumptions:", &self.assumptions);
        Self::section(&mut out, "Relevant memories:", &self.relevant_memories);
        Self::section(&mut out, "File assignments:", &self.file_assignments);
        out
    }

    /// Whether every section is empty.
    pub fn is_empty(&self) -> bool {
        self.goals.is_empty()
            && self.constraints.is_empty()
            && self.assumptions.is_empty()
            && self.relevant_memories.is_empty()
            && self.file_assignments.is_empty()
    }
}

/// Assembles the outbound payload for one dispatch.
///
/// Ordering is significant: the executor reads top-to-bottom and later
/// content overrides earlier framing, so the literal prompt always comes
/// last.
///
/// 1. dialogue-mode operating instructions (multi-turn only)
/// 2. prior dialogue history (continuations only)
/// 3. structured context
/// 4. the prompt
pub fn build_payload(
    dialogue: Option<&Dialogue>,
    history: &[String],
    context: Option<&DispatchContext>,
    prompt: &str,
) -> String {
    let mut payload = String::new();

    if let Some(dialogue) = dialogue {
        payload.push_str(&dialogue.operating_instructions());
        payload.push_str("\n\n");
    }

    if !history.is_empty() {
        payload.push_str("Previous exchange:\n");
        for line in history {
            payload.push_str(line);
            payload.push('\n');
        }
        payload.push('\n');
    }

    if let Some(context) = context {
        if !context.is_empty() {
            payload.push_str(&context.render());
        }
    }

    payload.push_str(prompt);
    payload
}
