//! Reward-eligible market and its two outcome tokens.

use super::id::{ConditionId, TokenId};
use super::money::Price;

/// One outcome leg of a [`Market`].
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    id: TokenId,
    label: String,
    complement: TokenId,
}

impl Token {
    #[must_use]
    pub fn new(id: TokenId, label: impl Into<String>, complement: TokenId) -> Self {
        Self {
            id,
            label: label.into(),
            complement,
        }
    }

    #[must_use]
    pub const fn id(&self) -> &TokenId {
        &self.id
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub const fn complement(&self) -> &TokenId {
        &self.complement
    }
}

/// A reward-eligible trading venue: a condition with exactly two
/// complementary outcome tokens.
///
/// Immutable once emitted by the scanner (`spec.md` §3): a rescan produces a
/// new `Market` value rather than mutating this one in place.
#[derive(Debug, Clone, PartialEq)]
pub struct Market {
    condition_id: ConditionId,
    question: String,
    yes: Token,
    no: Token,
    max_spread: Price,
    min_size: Price,
    daily_rate: Price,
    tick_size: Price,
    neg_risk: bool,
    score: f64,
}

impl Market {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        condition_id: ConditionId,
        question: impl Into<String>,
        yes: Token,
        no: Token,
        max_spread: Price,
        min_size: Price,
        daily_rate: Price,
        tick_size: Price,
        neg_risk: bool,
        score: f64,
    ) -> Self {
        Self {
            condition_id,
            question: question.into(),
            yes,
            no,
            max_spread,
            min_size,
            daily_rate,
            tick_size,
            neg_risk,
            score,
        }
    }

    #[must_use]
    pub const fn condition_id(&self) -> &ConditionId {
        &self.condition_id
    }

    #[must_use]
    pub fn question(&self) -> &str {
        &self.question
    }

    #[must_use]
    pub const fn yes(&self) -> &Token {
        &self.yes
    }

    #[must_use]
    pub const fn no(&self) -> &Token {
        &self.no
    }

    #[must_use]
    pub const fn max_spread(&self) -> Price {
        self.max_spread
    }

    #[must_use]
    pub const fn min_size(&self) -> Price {
        self.min_size
    }

    #[must_use]
    pub const fn daily_rate(&self) -> Price {
        self.daily_rate
    }

    #[must_use]
    pub const fn tick_size(&self) -> Price {
        self.tick_size
    }

    #[must_use]
    pub const fn neg_risk(&self) -> bool {
        self.neg_risk
    }

    #[must_use]
    pub const fn score(&self) -> f64 {
        self.score
    }

    /// Both tokens of this market, in (yes, no) order.
    #[must_use]
    pub const fn tokens(&self) -> [&Token; 2] {
        [&self.yes, &self.no]
    }

    /// The other token in this market's pair, if `token` belongs to it.
    #[must_use]
    pub fn complement_of(&self, token: &TokenId) -> Option<&Token> {
        if self.yes.id() == token {
            Some(&self.no)
        } else if self.no.id() == token {
            Some(&self.yes)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn make_market() -> Market {
        Market::new(
            ConditionId::new("c1"),
            "Will it rain?",
            Token::new(TokenId::new("yes"), "Yes", TokenId::new("no")),
            Token::new(TokenId::new("no"), "No", TokenId::new("yes")),
            dec!(0.05),
            dec!(100),
            dec!(30),
            dec!(0.01),
            false,
            1.5,
        )
    }

    #[test]
    fn accessors_roundtrip() {
        let m = make_market();
        assert_eq!(m.condition_id().as_str(), "c1");
        assert_eq!(m.question(), "Will it rain?");
        assert_eq!(m.max_spread(), dec!(0.05));
        assert_eq!(m.min_size(), dec!(100));
        assert_eq!(m.daily_rate(), dec!(30));
        assert_eq!(m.tick_size(), dec!(0.01));
        assert!(!m.neg_risk());
        assert!((m.score() - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn complement_of_finds_other_leg() {
        let m = make_market();
        let comp = m.complement_of(&TokenId::new("yes")).unwrap();
        assert_eq!(comp.id(), &TokenId::new("no"));
        let comp = m.complement_of(&TokenId::new("no")).unwrap();
        assert_eq!(comp.id(), &TokenId::new("yes"));
    }

    #[test]
    fn complement_of_unrelated_token_is_none() {
        let m = make_market();
        assert!(m.complement_of(&TokenId::new("other")).is_none());
    }

    #[test]
    fn tokens_returns_both_legs() {
        let m = make_market();
        let toks = m.tokens();
        assert_eq!(toks[0].id(), &TokenId::new("yes"));
        assert_eq!(toks[1].id(), &TokenId::new("no"));
    }
}
