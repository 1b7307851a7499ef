//! Three-step application questionnaire.
//!
//! Lighter than the onboarding form: free-text answers only, a step is
//! complete once any of its required questions is answered, and the form
//! can be sent as soon as anything at all was filled in.

use std::collections::BTreeMap;

/// One question of the questionnaire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Question {
    /// Answer key.
    pub id: &'static str,
    /// Text shown to the applicant.
    pub label: &'static str,
    /// Counts towards step completion.
    pub required: bool,
    /// Rendered as a multi-line field.
    pub multiline: bool,
}

/// A titled group of questions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuestionStep {
    /// Step title.
    pub title: &'static str,
    /// Questions in display order.
    pub questions: &'static [Question],
}

const fn input(id: &'static str, label: &'static str) -> Question {
    Question {
        id,
        label,
        required: true,
        multiline: false,
    }
}

const fn textarea(id: &'static str, label: &'static str) -> Question {
    Question {
        id,
        label,
        required: true,
        multiline: true,
    }
}

/// Steps of the questionnaire.
pub const APPLICATION_STEPS: [QuestionStep; 3] = [
    QuestionStep {
        title: "Project Information",
        questions: &[
            input("website", "Link to the site to which the solution is being integrated"),
            input("contact", "Contact person (Full name, Telegram username in @_ format)"),
            textarea(
                "geo",
                "List of countries (GEO) with which cooperation is planned, with % of traffic for each",
            ),
            input("volume1m", "Planned turnover (volume) of funds in the first month"),
            input("volume2m", "Planned turnover (volume) of funds in the second month"),
            input("volume3m", "Planned turnover (volume) of funds in the third month"),
            input("currency", "List of desired currencies for work (EUR, USD, UAH, etc.)"),
            textarea("processingHistory", "Do you have processing history?"),
        ],
    },
    QuestionStep {
        title: "Financial Information",
        questions: &[
            textarea("countries", "Target countries (GEO) with traffic percentage for each"),
            textarea(
                "monthlyVolumes",
                "Expected monthly volumes for first 3 months (in your currency)",
            ),
            textarea("currencies", "Desired currencies for operations (EUR, USD, UAH etc.)"),
            input("avgTransaction", "Average transaction amount (in your currency)"),
            input("chargebackRate", "Expected chargeback rate (% of volume)"),
            input("refundRate", "Expected refund rate (% of volume)"),
        ],
    },
    QuestionStep {
        title: "Technical Information",
        questions: &[
            textarea("trafficType", "Traffic type (FTD/TD ratio and volume for each if both)"),
            input("cardPayouts", "Do you need card payouts for your clients?"),
            input(
                "integrationPlatform",
                "Which platform do you use (Corefy, Praxis, Devcode etc.)?",
            ),
        ],
    },
];

/// Questionnaire state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplicationWizard {
    current_step: usize,
    answers: [BTreeMap<&'static str, String>; 3],
}

impl ApplicationWizard {
    /// Empty questionnaire on the first step.
    pub fn new() -> Self {
        Self::default()
    }

    /// Step definitions.
    pub fn steps() -> &'static [QuestionStep] {
        &APPLICATION_STEPS
    }

    /// 0-based current step.
    pub fn current_step(&self) -> usize {
        self.current_step
    }

    /// Moves forward, staying on the last step.
    pub fn next_step(&mut self) {
        if self.current_step + 1 < APPLICATION_STEPS.len() {
            self.current_step += 1;
        }
    }

    /// Moves back, staying on the first step.
    pub fn previous_step(&mut self) {
        self.current_step = self.current_step.saturating_sub(1);
    }

    /// True on the first step.
    pub fn is_first_step(&self) -> bool {
        self.current_step == 0
    }

    /// True on the last step.
    pub fn is_last_step(&self) -> bool {
        self.current_step == APPLICATION_STEPS.len() - 1
    }

    /// Stores an answer. Returns false if `step` has no question `id`.
    pub fn set_answer(&mut self, step: usize, id: &str, value: impl Into<String>) -> bool {
        let Some(question) = find_question(step, id) else {
            return false;
        };
        self.answers[step].insert(question.id, value.into());
        true
    }

    /// Answer to a question, empty when unanswered.
    pub fn answer(&self, step: usize, id: &str) -> &str {
        self.answers
            .get(step)
            .and_then(|answers| answers.get(id))
            .map_or("", String::as_str)
    }

    /// A step is complete once any required question has a non-blank
    /// answer; a step without required questions always is. Unknown steps
    /// are invalid.
    pub fn validate_step(&self, step: usize) -> bool {
        let Some(definition) = APPLICATION_STEPS.get(step) else {
            return false;
        };
        let mut required = definition.questions.iter().filter(|q| q.required).peekable();
        if required.peek().is_none() {
            return true;
        }
        required.any(|q| !self.answer(step, q.id).trim().is_empty())
    }

    /// True once any answer anywhere is non-blank.
    pub fn validate_form(&self) -> bool {
        self.answers
            .iter()
            .flat_map(|answers| answers.values())
            .any(|value| !value.trim().is_empty())
    }

    /// Clears every answer and returns to the first step.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Non-blank answers as `(question id, answer)`, in question order.
    pub fn to_fields(&self) -> Vec<(&'static str, String)> {
        APPLICATION_STEPS
            .iter()
            .enumerate()
            .flat_map(|(step, definition)| {
                definition
                    .questions
                    .iter()
                    .map(move |q| (step, q.id))
            })
            .filter_map(|(step, id)| {
                let value = self.answer(step, id).trim();
                (!value.is_empty()).then(|| (id, value.to_string()))
            })
            .collect()
    }
}

fn find_question(step: usize, id: &str) -> Option<&'static Question> {
    APPLICATION_STEPS
        .get(step)?
        .questions
        .iter()
        .find(|q| q.id == id)
}
