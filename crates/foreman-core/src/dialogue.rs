use crate::{ForemanError, ForemanResult};
use serde::{Deserialize, Serialize};

/// State of a multi-turn exchange layered on top of a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DialogueState {
    /// The executor is waiting for more input from the caller.
    NeedsInput,
    /// The executor produced output that requires caller approval.
    NeedsApproval,
    /// The executor produced output that requires verification.
    NeedsVerification,
    /// Terminal: the output was approved and may be treated as final.
    Approved,
    /// Terminal: the output was rejected.
    Rejected,
    /// Terminal: the exchange finished without an approval gate.
    Completed,
}

impl DialogueState {
    /// Terminal states accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DialogueState::Approved | DialogueState::Rejected | DialogueState::Completed
        )
    }

    /// Only `approved` and `completed` output may be treated as final.
    pub fn is_final(self) -> bool {
        matches!(self, DialogueState::Approved | DialogueState::Completed)
    }

    fn allows(self, next: DialogueState) -> bool {
        use DialogueState::*;
        match self {
            NeedsInput => matches!(next, NeedsInput | NeedsApproval | NeedsVerification | Completed),
            NeedsApproval => matches!(next, NeedsInput | Approved | Rejected),
            NeedsVerification => {
                matches!(next, NeedsInput | NeedsVerification | Approved | Rejected)
            }
            Approved | Rejected | Completed => false,
        }
    }
}

impl std::fmt::Display for DialogueState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DialogueState::NeedsInput => "needs_input",
            DialogueState::NeedsApproval => "needs_approval",
            DialogueState::NeedsVerification => "needs_verification",
            DialogueState::Approved => "approved",
            DialogueState::Rejected => "rejected",
            DialogueState::Completed => "completed",
        };
        write!(f, "{s}")
    }
}

/// The dialogue state machine attached to an execution handle.
///
/// Transitions go through [`Dialogue::advance`], a pure function: the
/// current value is never mutated, a new one is returned. The `turn`
/// counter strictly increases on every accepted exchange, which makes
/// replay deterministic without the real execution host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dialogue {
    /// Current state of the exchange.
    pub state: DialogueState,
    /// 1-based exchange counter.
    pub turn: u32,
}

impl Dialogue {
    /// Opens a dialogue waiting for its first input.
    pub fn new() -> Self {
        Self {
            state: DialogueState::NeedsInput,
            turn: 1,
        }
    }

    /// Advances to `next`, returning the successor dialogue.
    ///
    /// Fails when the current state is terminal or the edge is not part of
    /// the state machine.
    pub fn advance(self, next: DialogueState) -> ForemanResult<Dialogue> {
        if self.state.is_terminal() {
            return Err(ForemanError::Dialogue(format!(
                "state '{}' is terminal; no further transitions",
                self.state
            )));
        }
        if !self.state.allows(next) {
            return Err(ForemanError::Dialogue(format!(
                "illegal transition '{}' -> '{next}'",
                self.state
            )));
        }
        Ok(Dialogue {
            state: next,
            turn: self.turn + 1,
        })
    }

    /// Whether the dialogue's output may be treated as final.
    pub fn is_final(&self) -> bool {
        self.state.is_final()
    }

    /// Operating instructions injected at the top of dialogue-mode payloads.
    ///
    /// Placed first so that later payload sections (history, context,
    /// prompt) can override its framing.
    pub fn operating_instructions(&self) -> String {
        format!(
            "You are in a multi-turn exchange (turn {}). End every reply with \
             exactly one state marker: NEEDS_INPUT if you require more \
             information, NEEDS_APPROVAL if your output must be approved \
             before use, NEEDS_VERIFICATION if your output must be checked, \
             or COMPLETED when you are done.",
            self.turn
        )
    }
}

impl Default for Dialogue {
    fn default() -> Self {
        Self::new()
    }
}
