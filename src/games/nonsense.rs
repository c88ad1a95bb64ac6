//! Nonsense story state machine
//!
//! A collaborative story: a question set is chosen when the story opens,
//! contributions rotate over the participants in join order and the
//! questions cycle indefinitely. The story stays open until an admin
//! explicitly closes it; closing is the only terminal transition and there
//! are never ledger effects.

use crate::errors::{EngineError, EngineResult};
use crate::games::{ApplyCtx, Effect, PlayerAction};
use crate::UserId;
use rand::Rng;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum NonsensePhase {
    Open,
    Closed,
}

/// One accepted story line
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Contribution {
    pub author: UserId,
    pub question: String,
    pub text: String,
}

/// One collaborative story
#[derive(Clone, Debug)]
pub struct NonsenseStory {
    phase: NonsensePhase,
    questions: Vec<String>,
    participants: Vec<UserId>,
    contributions: Vec<Contribution>,
}

impl NonsenseStory {
    /// Open a story with a randomly chosen question set
    pub fn new(ctx: &mut ApplyCtx<'_>) -> Self {
        let templates = &ctx.config.nonsense.templates;
        let questions = templates[ctx.rng.gen_range(0..templates.len())].clone();
        Self {
            phase: NonsensePhase::Open,
            questions,
            participants: vec![],
            contributions: vec![],
        }
    }

    pub fn is_closed(&self) -> bool {
        self.phase == NonsensePhase::Closed
    }

    pub fn phase_name(&self) -> &'static str {
        match self.phase {
            NonsensePhase::Open => "open",
            NonsensePhase::Closed => "closed",
        }
    }

    pub fn participants(&self) -> Vec<UserId> {
        self.participants.clone()
    }

    pub fn contributions(&self) -> &[Contribution] {
        &self.contributions
    }

    /// The participant expected to answer next
    pub fn next_author(&self) -> Option<UserId> {
        if self.phase != NonsensePhase::Open || self.participants.is_empty() {
            return None;
        }
        Some(self.participants[self.contributions.len() % self.participants.len()])
    }

    /// The question the next contribution answers; the set cycles forever
    pub fn next_question(&self) -> &str {
        &self.questions[self.contributions.len() % self.questions.len()]
    }

    pub fn apply(
        &self,
        action: &PlayerAction,
        ctx: &mut ApplyCtx<'_>,
    ) -> EngineResult<(NonsenseStory, Vec<Effect>)> {
        match action {
            PlayerAction::Join => self.join(ctx),
            PlayerAction::Contribute { text } => self.contribute(text, ctx),
            PlayerAction::Close => self.close(ctx),
            _ => Err(EngineError::InvalidAction(
                "not a nonsense story action".to_string(),
            )),
        }
    }

    fn join(&self, ctx: &mut ApplyCtx<'_>) -> EngineResult<(NonsenseStory, Vec<Effect>)> {
        self.ensure_open()?;
        if self.participants.contains(&ctx.actor) {
            return Err(EngineError::InvalidAction(
                "you are already in the story".to_string(),
            ));
        }
        let mut next = self.clone();
        next.participants.push(ctx.actor);
        Ok((next, vec![]))
    }

    fn contribute(
        &self,
        text: &str,
        ctx: &mut ApplyCtx<'_>,
    ) -> EngineResult<(NonsenseStory, Vec<Effect>)> {
        self.ensure_open()?;
        let text = text.trim();
        if text.is_empty() {
            return Err(EngineError::InvalidAction(
                "a contribution needs some text".to_string(),
            ));
        }
        match self.next_author() {
            None => {
                return Err(EngineError::InvalidAction(
                    "no one has joined the story yet".to_string(),
                ))
            }
            Some(expected) if expected != ctx.actor => return Err(EngineError::NotYourTurn),
            Some(_) => {}
        }

        let mut next = self.clone();
        next.contributions.push(Contribution {
            author: ctx.actor,
            question: self.next_question().to_string(),
            text: text.to_string(),
        });
        Ok((next, vec![]))
    }

    fn close(&self, ctx: &mut ApplyCtx<'_>) -> EngineResult<(NonsenseStory, Vec<Effect>)> {
        self.ensure_open()?;
        if !ctx.is_admin {
            return Err(EngineError::InvalidAction(
                "only an admin may close the story".to_string(),
            ));
        }
        let mut next = self.clone();
        next.phase = NonsensePhase::Closed;
        Ok((next, vec![]))
    }

    fn ensure_open(&self) -> EngineResult<()> {
        if self.phase != NonsensePhase::Open {
            return Err(EngineError::InvalidAction(
                "the story is closed".to_string(),
            ));
        }
        Ok(())
    }

    pub fn detail(&self) -> serde_json::Value {
        let story: Vec<serde_json::Value> = self
            .contributions
            .iter()
            .map(|c| {
                serde_json::json!({
                    "author": c.author,
                    "question": &c.question,
                    "text": &c.text,
                })
            })
            .collect();
        serde_json::json!({
            "phase": self.phase_name(),
            "participants": &self.participants,
            "next_author": self.next_author(),
            "next_question": if self.is_closed() { None } else { Some(self.next_question()) },
            "story": story,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn ctx<'a>(
        actor: i64,
        is_admin: bool,
        rng: &'a mut StdRng,
        config: &'a EngineConfig,
    ) -> ApplyCtx<'a> {
        ApplyCtx {
            actor: UserId(actor),
            is_admin,
            rng,
            config,
        }
    }

    fn open_story(participants: &[i64]) -> NonsenseStory {
        let config = EngineConfig::default();
        let mut rng = StdRng::seed_from_u64(5);
        let mut story = NonsenseStory::new(&mut ctx(1, false, &mut rng, &config));
        for id in participants {
            let (next, _) = story
                .apply(&PlayerAction::Join, &mut ctx(*id, false, &mut rng, &config))
                .unwrap();
            story = next;
        }
        story
    }

    fn contribute(text: &str) -> PlayerAction {
        PlayerAction::Contribute {
            text: text.to_string(),
        }
    }

    #[test]
    fn test_new_story_picks_a_template() {
        let story = open_story(&[]);
        assert_eq!(story.questions.len(), 5);
        assert_eq!(story.phase_name(), "open");
    }

    #[test]
    fn test_contributions_rotate_over_participants() {
        let config = EngineConfig::default();
        let mut rng = StdRng::seed_from_u64(5);
        let story = open_story(&[1, 2]);
        assert_eq!(story.next_author(), Some(UserId(1)));

        let (story, _) = story
            .apply(&contribute("once upon"), &mut ctx(1, false, &mut rng, &config))
            .unwrap();
        assert_eq!(story.next_author(), Some(UserId(2)));

        // Out of turn
        let err = story
            .apply(&contribute("me again"), &mut ctx(1, false, &mut rng, &config))
            .unwrap_err();
        assert_eq!(err, EngineError::NotYourTurn);

        let (story, _) = story
            .apply(&contribute("a dragon"), &mut ctx(2, false, &mut rng, &config))
            .unwrap();
        assert_eq!(story.contributions().len(), 2);
        assert_eq!(story.contributions()[0].author, UserId(1));
        assert_eq!(story.contributions()[1].author, UserId(2));
    }

    #[test]
    fn test_questions_cycle_past_the_template() {
        let config = EngineConfig::default();
        let mut rng = StdRng::seed_from_u64(5);
        let mut story = open_story(&[1]);
        let first_question = story.next_question().to_string();
        for i in 0..5 {
            let (next, _) = story
                .apply(
                    &contribute(&format!("line {}", i)),
                    &mut ctx(1, false, &mut rng, &config),
                )
                .unwrap();
            story = next;
        }
        // After a full pass the question list wraps around
        assert_eq!(story.next_question(), first_question);
        assert_eq!(story.contributions().len(), 5);
    }

    #[test]
    fn test_empty_contribution_rejected() {
        let config = EngineConfig::default();
        let mut rng = StdRng::seed_from_u64(5);
        let story = open_story(&[1]);
        let err = story
            .apply(&contribute("   "), &mut ctx(1, false, &mut rng, &config))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidAction(_)));
    }

    #[test]
    fn test_close_is_admin_only() {
        let config = EngineConfig::default();
        let mut rng = StdRng::seed_from_u64(5);
        let story = open_story(&[1]);

        let err = story
            .apply(&PlayerAction::Close, &mut ctx(1, false, &mut rng, &config))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidAction(_)));

        let (story, effects) = story
            .apply(&PlayerAction::Close, &mut ctx(9, true, &mut rng, &config))
            .unwrap();
        assert!(story.is_closed());
        assert!(effects.is_empty());

        // Closed stories accept nothing further
        let err = story
            .apply(&contribute("more"), &mut ctx(1, false, &mut rng, &config))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidAction(_)));
    }
}
