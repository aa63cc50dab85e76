// src/bot/pattern_matching.rs - Compiled moderation rules over normalized text

use anyhow::{Context, Result};
use log::{debug, warn};
use regex::Regex;

use crate::bot::normalizer::normalize;
use crate::types::RuleTag;

/// Always-active banned words, independent of operator configuration
pub const BASELINE_BANNED_WORDS: [&str; 5] = ["hoe", "hoes", "cunt", "bitch", "bitches"];

/// Order in which the semantic detectors are consulted; first match wins
pub const SEMANTIC_ORDER: [RuleTag; 5] = [
    RuleTag::FuckYou,
    RuleTag::BitchInsult,
    RuleTag::CheaterAccusation,
    RuleTag::PlayerImplication,
    RuleTag::LoyaltyImplication,
];

const ADDRESSEE: &str = r"\b(?:you|u|ur|he|she|they|bro|dude|guys?|girls?|boys?|buddy|pal|homie|sis|brother|sister|dawg|this|that|it|these|those)\b";

/// "<token> is", "<token>'s", "<token> is a", "<token>'s a" (apostrophes are spaces by now).
/// Only pronoun contractions are accepted without the apostrophe, so plurals never count.
const SUBJECT: &str = r"\b(?:[a-z0-9]+\s+(?:is|s)|hes|shes|its|thats|whos)\s+(?:a\s+)?";

const GIRL_ALT: &str = "girls?|gurls?|women|woman|chicks?|hoes|females?|shawties|shorties|baddies|ladies";
const GIRL_SINGULAR: &str = "(?:girl|gurl|woman|chick|hoe|female|shawty|baddie)s?";
const QUANTITY: &str = r"\b(?:hella|many|every|all|lots|a\s+lot|alot)\b";
const POSSESSION: &str = r"\b(?:got|has|have)\b";
const PHRASE_QUANTITY: &str =
    r"(?:(?:so|too)\s+)?(?:hella|many|every|all(?:\s+the)?|lots\s+of|a\s+lot\s+of|alot\s+of|multiple|several|mad)";
const PLAYER_WORDS: &str = "player|playa|playboy|fboy|fuckboy|womanizer|womaniser|manwhore";

/// How a rule's primary pattern is gated by the rest of the message
#[derive(Debug, Clone)]
enum GateSpec {
    /// The pattern alone is enough
    Always,
    /// The message must also be directed at someone
    Directed,
    /// The message must be directed, or also match this pattern
    DirectedOr(String),
}

#[derive(Debug, Clone)]
struct RuleSpec {
    tag: RuleTag,
    pattern: String,
    /// Additional patterns that must all be present
    also: Vec<String>,
    gate: GateSpec,
}

impl RuleSpec {
    fn new(tag: RuleTag, pattern: impl Into<String>, gate: GateSpec) -> Self {
        Self { tag, pattern: pattern.into(), also: Vec::new(), gate }
    }

    fn also(mut self, pattern: impl Into<String>) -> Self {
        self.also.push(pattern.into());
        self
    }
}

fn girl_reference() -> String {
    format!(r"\b(?:{})\b", GIRL_ALT)
}

/// The full semantic rule set as (pattern, tag) entries
fn rule_table() -> Vec<RuleSpec> {
    use GateSpec::{Always, Directed, DirectedOr};
    use RuleTag::*;

    vec![
        // Deliberately over-broad: "fu" anywhere next to a separate "you" counts
        RuleSpec::new(FuckYou, r"\bf+\s*(?:[a-z]\s*){0,2}c+\s*k+\s*(?:s|in|ing)?\s*(?:y+\s*o+\s*u+|y+a+|u+)\b", Always),
        RuleSpec::new(FuckYou, r"\bf+\s*y+o+u+\b", Always),
        RuleSpec::new(FuckYou, r"\bf+\s+u+\b", Always),
        RuleSpec::new(FuckYou, r"\bfu+h*\s+u+\b", Always),
        RuleSpec::new(FuckYou, r"\bfu", Always).also(r"\byou\b"),

        RuleSpec::new(BitchInsult, r"\b(?:bitch(?:es|y|ass)?|biatch|biotch|bish)\b", Directed),
        RuleSpec::new(BitchInsult, format!(r"{}(?:bitch(?:es)?|biatch|bish)\b", SUBJECT), Always),

        RuleSpec::new(CheaterAccusation, format!(r"{}cheat[a-z]*", SUBJECT), Always),
        RuleSpec::new(CheaterAccusation, r"\bcheat[a-z]*", Directed),
        RuleSpec::new(CheaterAccusation, r"\bstop\s+cheat[a-z]*", Always),
        RuleSpec::new(CheaterAccusation, r"\b(?:is|are)\s+cheat[a-z]*", Always),

        RuleSpec::new(PlayerImplication, format!(r"\b(?:{}|f\s+boy|man\s+whore)s?\b", PLAYER_WORDS), Directed),
        RuleSpec::new(PlayerImplication, format!(r"{}(?:{})\b", SUBJECT, PLAYER_WORDS), Always),
        RuleSpec::new(PlayerImplication, QUANTITY, DirectedOr(POSSESSION.to_string())).also(girl_reference()),
        RuleSpec::new(
            PlayerImplication,
            format!(
                r"\b(?:talk(?:s|ed|ing)?|text(?:s|ed|ing)?|dms?|dming|messag(?:e|es|ed|ing)|chat(?:s|ted|ting)?)\s+(?:to|with)\s+{}\s+(?:{})\b",
                PHRASE_QUANTITY, GIRL_ALT
            ),
            Always,
        ),
        RuleSpec::new(
            PlayerImplication,
            format!(r"\b(?:flirt(?:s|ed|ing)?|rizz(?:es|ed|ing)?)\s+(?:with\s+|up\s+)?{}\s+(?:{})\b", PHRASE_QUANTITY, GIRL_ALT),
            Always,
        ),
        RuleSpec::new(PlayerImplication, r"\bslid(?:e|es|ing)\s+in(?:to)?\s+(?:[a-z]+\s+){0,2}(?:dms?|inbox(?:es)?)\b", Always)
            .also(format!(r"\b(?:every|all|everyone|everybody|hella|many|{})\b", GIRL_ALT)),

        RuleSpec::new(LoyaltyImplication, r"\b[a-z0-9]+\s+(?:lacks?|has\s+no|have\s+no|got\s+no)\s+loyalty\b", Always),
        RuleSpec::new(
            LoyaltyImplication,
            r"\b[a-z0-9]+\s+(?:is\s+not|s\s+not|isnt|isn\s+t|aint|ain\s+t|is\s+never|s\s+never)\s+loyal\b",
            Always,
        ),
        RuleSpec::new(LoyaltyImplication, r"\b(?:disloyal|unloyal|unfaithful|not\s+faithful|not\s+loyal)\b", Directed),
        RuleSpec::new(
            LoyaltyImplication,
            format!(
                r"\b(?:go|goes|going|went|jump(?:s|ed|ing)?|hop(?:s|ped|ping)?|moves?|moved|moving)\s+from\s+(?:one\s+)?{g}\s+to\s+(?:another(?:\s+{g})?|the\s+next(?:\s+{g})?|{g})\b",
                g = GIRL_SINGULAR
            ),
            Always,
        ),
        RuleSpec::new(
            LoyaltyImplication,
            format!(r"\b(?:new|different|another)\s+{}\s+every\s+(?:day|night|week|month)\b", GIRL_SINGULAR),
            Always,
        ),
        RuleSpec::new(
            LoyaltyImplication,
            format!(r"\bevery\s+(?:day|night|week|month)\s+(?:a\s+|its\s+a\s+|it\s+s\s+a\s+)?(?:new|different|another)\s+{}\b", GIRL_SINGULAR),
            Always,
        ),
        RuleSpec::new(LoyaltyImplication, r"\b(?:has|have|got|had)\s+(?:a\s+)?(?:whole\s+)?(?:roster|rotation)\b", Always)
            .also(girl_reference()),
    ]
}

fn compile(tag: RuleTag, pattern: &str) -> Result<Regex> {
    Regex::new(pattern).with_context(|| format!("Invalid {} rule pattern: {}", tag, pattern))
}

#[derive(Debug, Clone)]
enum Gate {
    Always,
    Directed,
    DirectedOr(Regex),
}

/// A precompiled matcher plus its classification tag
#[derive(Debug, Clone)]
pub struct PatternRule {
    pub tag: RuleTag,
    pattern: Regex,
    also: Vec<Regex>,
    gate: Gate,
}

impl PatternRule {
    fn from_spec(spec: RuleSpec) -> Result<Self> {
        let pattern = compile(spec.tag, &spec.pattern)?;
        let also = spec
            .also
            .iter()
            .map(|p| compile(spec.tag, p))
            .collect::<Result<Vec<_>>>()?;
        let gate = match spec.gate {
            GateSpec::Always => Gate::Always,
            GateSpec::Directed => Gate::Directed,
            GateSpec::DirectedOr(p) => Gate::DirectedOr(compile(spec.tag, &p)?),
        };
        Ok(Self { tag: spec.tag, pattern, also, gate })
    }

    fn matches(&self, text: &str, directed: bool) -> bool {
        if !self.pattern.is_match(text) || !self.also.iter().all(|r| r.is_match(text)) {
            return false;
        }
        match &self.gate {
            Gate::Always => true,
            Gate::Directed => directed,
            Gate::DirectedOr(alternative) => directed || alternative.is_match(text),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BannedWordKind {
    /// Exact word: "badword"
    Exact,
    /// Stem with any alphanumeric suffix: "bad*"
    Stem,
}

/// A banned word compiled to tolerate whitespace between its letters
#[derive(Debug, Clone)]
pub struct BannedWordPattern {
    pub source: String,
    pub kind: BannedWordKind,
    regex: Regex,
}

impl BannedWordPattern {
    /// Compile an operator entry. Returns `None` when nothing remains after normalization.
    pub fn compile(entry: &str) -> Result<Option<Self>> {
        let entry = entry.trim();
        let (kind, body) = match entry.strip_suffix('*') {
            Some(body) => (BannedWordKind::Stem, body),
            None => (BannedWordKind::Exact, entry),
        };

        let target: String = normalize(body).chars().filter(|c| !c.is_whitespace()).collect();
        if target.is_empty() {
            return Ok(None);
        }

        let letters: Vec<String> = target.chars().map(|c| regex::escape(&c.to_string())).collect();
        let mut pattern = format!(r"\b{}", letters.join(r"\s*"));
        if kind == BannedWordKind::Stem {
            pattern.push_str("[a-z0-9]*");
        }
        pattern.push_str(r"\b");

        let regex = Regex::new(&pattern)
            .with_context(|| format!("Invalid banned word pattern for '{}': {}", entry, pattern))?;

        Ok(Some(Self { source: entry.to_string(), kind, regex }))
    }

    pub fn matches(&self, normalized_text: &str) -> bool {
        self.regex.is_match(normalized_text)
    }
}

/// The fixed rule set plus the banned-word list, compiled once at startup
#[derive(Debug, Clone)]
pub struct PatternLibrary {
    rules: Vec<PatternRule>,
    banned: Vec<BannedWordPattern>,
    addressee: Regex,
}

impl PatternLibrary {
    /// Build the library from the baseline plus operator-configured ban entries
    pub fn new<S: AsRef<str>>(ban_words: &[S]) -> Result<Self> {
        let rules = rule_table()
            .into_iter()
            .map(PatternRule::from_spec)
            .collect::<Result<Vec<_>>>()?;

        let mut entries: Vec<&str> = BASELINE_BANNED_WORDS.to_vec();
        entries.extend(ban_words.iter().map(|w| w.as_ref()));

        let mut banned = Vec::new();
        for entry in entries {
            match BannedWordPattern::compile(entry)? {
                Some(pattern) => banned.push(pattern),
                None => warn!("Ignoring empty banned word entry '{}'", entry),
            }
        }

        debug!("Compiled {} semantic rules and {} banned word patterns", rules.len(), banned.len());

        Ok(Self {
            rules,
            banned,
            addressee: Regex::new(ADDRESSEE).context("Invalid addressee pattern")?,
        })
    }

    pub fn rules(&self) -> &[PatternRule] {
        &self.rules
    }

    pub fn banned_patterns(&self) -> &[BannedWordPattern] {
        &self.banned
    }

    /// True when the message mentioned someone or addresses a person/thing present
    pub fn is_directed_at(&self, text: &str, had_mention: bool) -> bool {
        had_mention || self.addressee.is_match(text)
    }

    pub fn contains_banned_word(&self, text: &str) -> bool {
        self.banned.iter().any(|p| p.matches(text))
    }

    /// Evaluate one classification over normalized text.
    /// `WordCombo` depends on room configuration and never matches here.
    pub fn matches(&self, tag: RuleTag, text: &str, had_mention: bool) -> bool {
        match tag {
            RuleTag::BannedWord => self.contains_banned_word(text),
            RuleTag::WordCombo => false,
            _ => {
                let directed = self.is_directed_at(text, had_mention);
                self.rules.iter().filter(|r| r.tag == tag).any(|r| r.matches(text, directed))
            }
        }
    }

    /// First semantic detector (in evaluation order) that matches
    pub fn first_semantic_match(&self, text: &str, had_mention: bool) -> Option<RuleTag> {
        SEMANTIC_ORDER
            .iter()
            .copied()
            .find(|tag| self.matches(*tag, text, had_mention))
    }

    pub fn is_fuck_you_super_strict(&self, text: &str) -> bool {
        self.matches(RuleTag::FuckYou, text, false)
    }

    pub fn is_bitch_insult(&self, text: &str, had_mention: bool) -> bool {
        self.matches(RuleTag::BitchInsult, text, had_mention)
    }

    pub fn is_cheater_accusation(&self, text: &str, had_mention: bool) -> bool {
        self.matches(RuleTag::CheaterAccusation, text, had_mention)
    }

    pub fn is_player_implication(&self, text: &str, had_mention: bool) -> bool {
        self.matches(RuleTag::PlayerImplication, text, had_mention)
    }

    pub fn is_loyalty_implication(&self, text: &str, had_mention: bool) -> bool {
        self.matches(RuleTag::LoyaltyImplication, text, had_mention)
    }
}

/// True iff every configured word occurs somewhere in the text.
///
/// Plain substring containment, not word-boundary gated: "concatdoge" satisfies
/// `["cat", "dog"]`. This is looser than the semantic detectors on purpose.
pub fn contains_all_words<S: AsRef<str>>(text: &str, words: &[S]) -> bool {
    let haystack = text.to_lowercase();
    words
        .iter()
        .all(|word| haystack.contains(&word.as_ref().to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn library() -> PatternLibrary {
        PatternLibrary::new(&["gay*", "simp"]).unwrap()
    }

    #[test]
    fn test_all_rules_compile() {
        let lib = PatternLibrary::new::<&str>(&[]).unwrap();
        assert!(!lib.rules().is_empty());
        assert_eq!(lib.banned_patterns().len(), BASELINE_BANNED_WORDS.len());
        for tag in SEMANTIC_ORDER {
            assert!(lib.rules().iter().any(|r| r.tag == tag), "no rules for {}", tag);
        }
    }

    #[test]
    fn test_spaced_evasion() {
        let lib = library();
        assert!(lib.contains_banned_word("b i t c h"));
        assert!(lib.contains_banned_word(&normalize("b---i__t-c h")));
        assert!(lib.contains_banned_word("what a bitch"));
        assert!(lib.contains_banned_word(&normalize("C.U.N.T")));
        assert!(!lib.contains_banned_word("bitchin"));
        assert!(!lib.contains_banned_word("shoe store"));
    }

    #[test]
    fn test_stem_pattern() {
        let lib = library();
        assert!(lib.contains_banned_word("gays"));
        assert!(lib.contains_banned_word("g a y z z z"));
        assert!(lib.contains_banned_word("so gay"));
        assert!(!lib.contains_banned_word("the game was great"));
        assert!(!lib.contains_banned_word("okay then"));
    }

    #[test]
    fn test_exact_pattern_requires_whole_word() {
        let lib = library();
        assert!(lib.contains_banned_word("such a simp"));
        assert!(lib.contains_banned_word("s i m p"));
        assert!(!lib.contains_banned_word("simple"));
        assert!(!lib.contains_banned_word("simps"));
    }

    #[test]
    fn test_banned_entry_is_normalized() {
        let pattern = BannedWordPattern::compile("Sh1t*").unwrap().unwrap();
        assert_eq!(pattern.kind, BannedWordKind::Stem);
        assert!(pattern.matches("shitty"));
        assert!(BannedWordPattern::compile(" * ").unwrap().is_none());
        assert!(BannedWordPattern::compile("").unwrap().is_none());
    }

    #[test]
    fn test_directed_at() {
        let lib = library();
        assert!(lib.is_directed_at("you are", false));
        assert!(lib.is_directed_at("look at that", false));
        assert!(lib.is_directed_at("hey guys", false));
        assert!(lib.is_directed_at("nothing here", true));
        assert!(!lib.is_directed_at("cheating is bad", false));
        assert!(!lib.is_directed_at("your youth", false));
    }

    #[test]
    fn test_fuck_you_super_strict() {
        let lib = library();
        assert!(lib.is_fuck_you_super_strict("fuck you"));
        assert!(lib.is_fuck_you_super_strict("fuckk u"));
        assert!(lib.is_fuck_you_super_strict("fck you"));
        assert!(lib.is_fuck_you_super_strict("fucks you"));
        assert!(lib.is_fuck_you_super_strict(&normalize("f-you")));
        assert!(lib.is_fuck_you_super_strict("f you"));
        assert!(lib.is_fuck_you_super_strict("f u"));
        assert!(lib.is_fuck_you_super_strict("fuh u"));
        assert!(lib.is_fuck_you_super_strict("fu u"));
        assert!(lib.is_fuck_you_super_strict("fu man i hate you"));
        assert!(!lib.is_fuck_you_super_strict("thank you"));
        assert!(!lib.is_fuck_you_super_strict("fun game"));
    }

    #[test]
    fn test_fu_you_false_positive_is_kept() {
        // Super-strict policy: benign "fun" next to "you" still counts
        let lib = library();
        assert!(lib.is_fuck_you_super_strict("have fun with you"));
    }

    #[test]
    fn test_cheater_accusation_directed_vs_undirected() {
        let lib = library();
        assert!(!lib.is_cheater_accusation("cheating is bad", false));
        assert!(lib.is_cheater_accusation("you are cheating", false));
        assert!(lib.is_cheater_accusation("hes a cheater", false));
        assert!(lib.is_cheater_accusation(&normalize("he's a cheater"), false));
        assert!(lib.is_cheater_accusation("mike is a cheat", false));
        assert!(lib.is_cheater_accusation("stop cheating", false));
        assert!(lib.is_cheater_accusation("they are cheaters", false));
        assert!(lib.is_cheater_accusation("cheater", true));
        assert!(!lib.is_cheater_accusation("cheater", false));
        assert!(!lib.is_cheater_accusation("are a cheater", false));
    }

    #[test]
    fn test_plural_nouns_are_not_accusation_subjects() {
        let lib = library();
        for text in ["the game has cheat codes", "speedrunners cheat", "pros cheat sometimes"] {
            assert!(!lib.is_directed_at(text, false));
            assert!(!lib.is_cheater_accusation(text, false), "flagged {:?}", text);
            assert_eq!(lib.first_semantic_match(text, false), None);
        }
        assert!(!lib.is_bitch_insult("dogs bitches and puppies", false));
        assert!(!lib.is_player_implication("chess players", false));
        assert!(lib.is_cheater_accusation("its a cheat", false));
        assert!(lib.is_cheater_accusation(&normalize("she's cheating"), false));
    }

    #[test]
    fn test_bitch_insult() {
        let lib = library();
        assert!(lib.is_bitch_insult("you bitch", false));
        assert!(lib.is_bitch_insult("shes a bitch", false));
        assert!(lib.is_bitch_insult("bitch", true));
        assert!(!lib.is_bitch_insult("bitch", false));
        assert!(!lib.is_bitch_insult("you are great", false));
    }

    #[test]
    fn test_player_implication() {
        let lib = library();
        assert!(lib.is_player_implication("hes a player", false));
        assert!(lib.is_player_implication("you player", false));
        assert!(!lib.is_player_implication("player one wins", false));
        assert!(lib.is_player_implication("he has hella girls", false));
        assert!(lib.is_player_implication("talks to so many women", false));
        assert!(lib.is_player_implication("rizzing up all the chicks", false));
        assert!(lib.is_player_implication("slides into every dm", false));
        assert!(!lib.is_player_implication("slide into my dms", false));
        assert!(!lib.is_player_implication("many people came", false));
    }

    #[test]
    fn test_loyalty_implication() {
        let lib = library();
        assert!(lib.is_loyalty_implication("he lacks loyalty", false));
        assert!(lib.is_loyalty_implication("jake has no loyalty", false));
        assert!(lib.is_loyalty_implication("he is not loyal", false));
        assert!(lib.is_loyalty_implication(&normalize("he isn't loyal"), false));
        assert!(lib.is_loyalty_implication("you are unfaithful", false));
        assert!(!lib.is_loyalty_implication("unfaithful adaptation of the novel", false));
        assert!(lib.is_loyalty_implication("goes from girl to girl", false));
        assert!(lib.is_loyalty_implication("new girl every week", false));
        assert!(lib.is_loyalty_implication("every night a different girl", false));
        assert!(lib.is_loyalty_implication("got a whole rotation of baddies", false));
        assert!(!lib.is_loyalty_implication("loyalty program rewards", false));
        assert!(!lib.is_loyalty_implication("cats are not loyal", false));
        assert!(!lib.is_loyalty_implication("dogs not loyal to strangers", false));
        assert!(lib.is_loyalty_implication("you are not loyal", false));
    }

    #[test]
    fn test_first_semantic_match_order() {
        let lib = library();
        assert_eq!(lib.first_semantic_match("fuck you cheater", false), Some(RuleTag::FuckYou));
        assert_eq!(lib.first_semantic_match("you bitch stop cheating", false), Some(RuleTag::BitchInsult));
        assert_eq!(lib.first_semantic_match("nice weather today", false), None);
    }

    #[test]
    fn test_contains_all_words_is_substring_based() {
        // Not boundary gated: "concatdoge" contains both "cat" and "dog"
        assert!(contains_all_words("concatdoge", &["cat", "dog"]));
        assert!(contains_all_words("chunky cheater", &["chunky", "cheater"]));
        assert!(!contains_all_words("chunky", &["chunky", "cheater"]));
        assert!(contains_all_words("anything", &[] as &[&str]));
    }
}
