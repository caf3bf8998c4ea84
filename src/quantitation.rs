//! Rule-table classification of GEO data columns into typed quantitation-type descriptors.
//!
//! Every axis (scale, standard type, representation) is an ordered table of enum values, each with
//! name rules and description rules. The first value with a matching rule wins. Inputs are
//! lower-cased and rules are anchored at both ends, so a rule must match the whole text.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::KiraError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GeneralType {
    Quantitative,
    Categorical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScaleType {
    Percent,
    Linear,
    Log2,
    Log10,
    LogBaseUnknown,
    Unscaled,
    Ln,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StandardType {
    PresentAbsent,
    Amount,
    Count,
    ConfidenceIndicator,
    Coordinate,
    Correlation,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Representation {
    Double,
    Int,
    String,
    Boolean,
    Char,
}

/// A typed sample value from the column, when one is at hand.
#[derive(Debug, Clone, PartialEq)]
pub enum ExampleValue {
    Double(f64),
    Int(i64),
    Boolean(bool),
    Text(String),
}

impl ExampleValue {
    /// Types a raw cell as the narrowest value it parses as.
    pub fn from_raw(raw: &str) -> Self {
        let raw = raw.trim();
        if let Ok(value) = raw.parse::<i64>() {
            return ExampleValue::Int(value);
        }
        if let Ok(value) = raw.parse::<f64>() {
            return ExampleValue::Double(value);
        }
        match raw.to_ascii_lowercase().as_str() {
            "true" => ExampleValue::Boolean(true),
            "false" => ExampleValue::Boolean(false),
            _ => ExampleValue::Text(raw.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuantitationType {
    pub name: String,
    pub description: Option<String>,
    pub general_type: GeneralType,
    pub scale: ScaleType,
    pub standard_type: StandardType,
    pub representation: Representation,
    pub is_background: bool,
    pub is_background_subtracted: bool,
    pub is_normalized: bool,
    pub is_ratio: bool,
    pub is_preferred: bool,
    pub is_masked_preferred: bool,
}

/// An anchored pattern with an optional exclusion.
#[derive(Debug, Clone)]
pub struct Rule {
    pattern: Regex,
    unless: Option<Regex>,
}

impl Rule {
    pub fn new(pattern: &str) -> Result<Self, KiraError> {
        Ok(Self {
            pattern: compile(pattern)?,
            unless: None,
        })
    }

    pub fn unless(mut self, pattern: &str) -> Result<Self, KiraError> {
        self.unless = Some(compile(pattern)?);
        Ok(self)
    }

    pub fn matches(&self, text: &str) -> bool {
        self.pattern.is_match(text)
            && !self
                .unless
                .as_ref()
                .map(|unless| unless.is_match(text))
                .unwrap_or(false)
    }

    pub fn as_str(&self) -> &str {
        self.pattern.as_str()
    }
}

fn compile(pattern: &str) -> Result<Regex, KiraError> {
    Regex::new(&format!("(?i)^(?:{pattern})$")).map_err(|err| KiraError::InvalidPattern {
        pattern: pattern.to_string(),
        message: err.to_string(),
    })
}

fn any_match(rules: &[Rule], text: &str) -> bool {
    rules.iter().any(|rule| rule.matches(text))
}

#[derive(Debug, Clone)]
pub struct AxisEntry<T> {
    pub value: T,
    pub name: Vec<Rule>,
    pub description: Vec<Rule>,
}

/// Immutable pattern tables driving the guesser.
#[derive(Debug, Clone)]
pub struct QuantitationRules {
    pub scale: Vec<AxisEntry<ScaleType>>,
    pub standard: Vec<AxisEntry<StandardType>>,
    pub representation: Vec<AxisEntry<Representation>>,
    pub background_name: Vec<Rule>,
    pub background_description: Vec<Rule>,
    pub background_subtracted_name: Vec<Rule>,
    pub background_subtracted_description: Vec<Rule>,
    pub normalized: Vec<Rule>,
    pub ratio_name: Vec<Rule>,
    pub ratio_description: Vec<Rule>,
    pub preferred_name: Vec<Rule>,
}

static BUILTIN: Lazy<QuantitationRules> = Lazy::new(|| {
    build_builtin().expect("built-in quantitation patterns compile")
});

fn rules(patterns: &[&str]) -> Result<Vec<Rule>, KiraError> {
    patterns.iter().map(|pattern| Rule::new(pattern)).collect()
}

fn entry<T>(value: T, name: Vec<Rule>, description: Vec<Rule>) -> AxisEntry<T> {
    AxisEntry {
        value,
        name,
        description,
    }
}

fn build_builtin() -> Result<QuantitationRules, KiraError> {
    let log2 = [
        ".*log( )?2.*",
    ];
    let log10 = [".*log( )?10.*"];
    let log_unknown = || Rule::new(".*log.*")?.unless(".*log ?(10|2).*");

    let scale = vec![
        entry(
            ScaleType::Percent,
            rules(&["%.*", "pergtbch[12].*", "ch[12]_per_sat.*"])?,
            rules(&["(the\\s)?percent(age)?.*", "%.*"])?,
        ),
        entry(ScaleType::Linear, Vec::new(), Vec::new()),
        entry(ScaleType::Log2, rules(&log2)?, {
            let mut description = rules(&log2)?;
            description.extend(rules(&[
                "log \\(base 2\\)",
                "(gc?)rma(\\W.*)?",
                ".*?\\brma\\b.*?",
                "mas(\\s)?[56](\\.[0-9])? signal.*",
            ])?);
            description
        }),
        entry(ScaleType::Log10, rules(&log10)?, rules(&log10)?),
        entry(
            ScaleType::LogBaseUnknown,
            vec![log_unknown()?],
            vec![log_unknown()?],
        ),
        entry(ScaleType::Unscaled, Vec::new(), Vec::new()),
        entry(ScaleType::Ln, Vec::new(), rules(&[".*?natural log.*"])?),
    ];

    let mut amount_name = measured_signal_name_rules()?;
    amount_name.extend(derived_signal_name_rules()?);
    let mut amount_description = measured_signal_description_rules()?;
    amount_description.extend(derived_signal_description_rules()?);

    let standard = vec![
        entry(
            StandardType::PresentAbsent,
            rules(&[".*(pre|abs)([ _])?call.*"])?,
            rules(&[".*call.+present.*", ".*dchip detection call.*", "detection"])?,
        ),
        entry(StandardType::Amount, amount_name, amount_description),
        entry(
            StandardType::ConfidenceIndicator,
            rules(&[
                "[rg]_(bg)?_?sd",
                "[bf](532|635)[_\\s]sd",
                "p_value",
                "d_p-value",
                "ch[12](_bkd)?b?n? ?_(\\s)?sd",
                ".*ch[12][_\\s]confidence.*",
                ".*ch[12][i][_\\s]sd",
                ".*det(ection)?[_\\s-]p(-value)?.*",
            ])?,
            rules(&[
                ".*(mean|median|background) standard deviation.*",
                "standard deviation.*",
            ])?,
        ),
        entry(
            StandardType::Coordinate,
            rules(&[
                ".*(array_row|array_column|top|left|right|bot).*",
                "(x_coord|y_coord|x_location|y_location|x|y)",
                "(row|column)",
            ])?,
            Vec::new(),
        ),
        entry(
            StandardType::Correlation,
            Vec::new(),
            rules(&[".*correlation.*"])?,
        ),
        entry(
            StandardType::Other,
            rules(&[
                "pairs.*",
                "area",
                "dia\\.?(meter)?",
                "flags?",
                "(m|p)m[_\\s]excess",
                "negative",
            ])?,
            rules(&["number of pixels used to calculate a feature's intensity"])?,
        ),
    ];

    let representation = vec![
        entry(Representation::Double, Vec::new(), rules(&[".*ratio.*"])?),
        entry(Representation::Int, rules(&["pairs[_\\s]in[_\\s]?avg"])?, {
            let mut description = rules(&[
                ".*number of (background\\s)?pixels.*",
                ".*number of feature pixels.*",
                ".*number of (positive )?probe pairs.*",
                ".*number of probe set.*",
                "number of (positive|negative) probe pairs",
                "area",
                "b[\\s_]pixels",
                ".*(array_row|array_column|top|right|bot).*",
                ".*(x_coord|y_coord|x_location|y_location).*",
            ])?;
            description.push(Rule::new(".*pairs[_\\s]used.*")?.unless(".*positive/pairs[_\\s]used.*")?);
            description.push(Rule::new(".*left.*")?.unless(".*left\\safter.*")?);
            description
        }),
        entry(
            Representation::String,
            rules(&["abs([ _])?call", "flag(s)?"])?,
            Vec::new(),
        ),
        entry(Representation::Boolean, Vec::new(), Vec::new()),
        entry(Representation::Char, Vec::new(), Vec::new()),
    ];

    Ok(QuantitationRules {
        scale,
        standard,
        representation,
        background_name: rules(&["ch[12]b.*"])?,
        background_description: vec![
            Rule::new(".*background.*")?.unless(".*(subtracted\\s(by\\s)?|over the\\s)background.*")?,
        ],
        background_subtracted_name: rules(&[
            ".*- ch[12]_bkd",
            "ch[12]d.*",
            ".*((- )|_)b(532|635)",
            ".*- background",
            "rma",
            "gcrma",
            "dchip",
        ])?,
        background_subtracted_description: rules(&[
            ".*background[\\s-](subtracted|corrected).*",
            ".*difference between.*",
            ".*background intensity subtracted.*",
            ".*channel [12] (mean|median) signal background (subtracted|corrected).*",
        ])?,
        normalized: vec![
            Rule::new(".*normalized.*")?.unless(".*unnormalized.*")?,
            Rule::new("ch[12](b)?n.*")?,
            Rule::new("(unf_)?value")?,
            Rule::new("rma")?,
            Rule::new("dchip")?,
        ],
        ratio_name: rules(&["(pix_)?rat[12]n?_(mean|median)", ".*\\(.+?/.+?\\).*"])?,
        ratio_description: rules(&[
            ".*(fold[_\\s]change|ratio).*",
            ".*test/reference.*",
            ".*normch2/normch1.*",
            ".*percent(age)?.*",
        ])?,
        preferred_name: rules(&["value", "rma", "gcrma", "dchip", "chpsignal", "signal"])?,
    })
}

fn measured_signal_name_rules() -> Result<Vec<Rule>, KiraError> {
    rules(&[
        ".*[rg]_?(mean|median).*",
        ".*ch[12][ib]?_(mean|median).*",
        ".*ch[12]_(mean|bkg).*",
        ".*channel [12] (mean|median) (signal|intensity).*",
        "[fb](635|532)[_\\s\\.](mean|median).*",
    ])
}

fn derived_signal_name_rules() -> Result<Vec<Rule>, KiraError> {
    rules(&[
        "ch[12][nd]_(mean|median).*",
        ".*channel[\\s_ ][12]\\s?(mean|median)?\\s?(signal|intensity) - background",
        "pos[/_](neg|fraction).*",
        "%.*",
        "ch[12]_per_sat.*",
        "f(635|532)[_\\s\\.](mean|median)(\\s-\\s|_)b(635|532)",
        "pergtbch[12].*",
    ])
}

fn measured_signal_description_rules() -> Result<Vec<Rule>, KiraError> {
    Ok(vec![
        Rule::new(".*channel[\\s_ ][12] (mean|median) (signal|intensity) .*")?
            .unless(".*channel[\\s_ ][12] (mean|median) (signal|intensity) - background.*")?,
        Rule::new(".*(red|green|cy5|cy3) (mean|median) (feature)? intensity.*")?,
    ])
}

fn derived_signal_description_rules() -> Result<Vec<Rule>, KiraError> {
    let mut description = rules(&[
        ".*channel [12] (mean|median) signal background (subtracted|corrected).*",
        ".*processed_signal",
        ".*difference between.*",
        ".*relative abundance of a transcript.*",
        "mas(\\s+)?[56](\\.[0-9])? signal.*",
        ".*background[\\s-](subtraction|substraction|subtracted|corrected).*",
        ".*processed.*",
        "sum_of_(mean|median)s",
        ".*\\s+\\s.*",
    ])?;
    description.push(Rule::new(".*normalized.*")?.unless(".*unnormalized.*")?);
    Ok(description)
}

impl QuantitationRules {
    /// The built-in tables, compiled once.
    pub fn builtin() -> &'static QuantitationRules {
        &BUILTIN
    }

    /// Built-in tables extended with extra measured-signal and derived-signal description patterns.
    pub fn with_extra(measured: &[String], derived: &[String]) -> Result<Self, KiraError> {
        let mut merged = Self::builtin().clone();
        let extra = measured
            .iter()
            .chain(derived)
            .map(|pattern| Rule::new(pattern))
            .collect::<Result<Vec<_>, _>>()?;
        if let Some(amount) = merged
            .standard
            .iter_mut()
            .find(|entry| entry.value == StandardType::Amount)
        {
            amount.description.extend(extra);
        }
        Ok(merged)
    }
}

impl Default for QuantitationRules {
    fn default() -> Self {
        Self::builtin().clone()
    }
}

/// Name-based gates that decide whether a column can be an intensity at all.
struct Gates {
    ratio_like: Regex,
    spread_like: Regex,
    mismatch_excess: Regex,
    subtracted_by_background: Regex,
    minus_background_channel: Regex,
    minus_background: Regex,
    foreground: Regex,
}

static GATES: Lazy<Gates> = Lazy::new(|| Gates {
    ratio_like: Regex::new(r"^(pix_)?rat(io)?").expect("static pattern"),
    spread_like: Regex::new(r"^(.*[_\s](sd|avg)|detection|chpdetection)$").expect("static pattern"),
    mismatch_excess: Regex::new(r"^([pm])m[\s_]excess$").expect("static pattern"),
    subtracted_by_background: Regex::new(r"^subtracted by .*? background$").expect("static pattern"),
    minus_background_channel: Regex::new(r"^.*- b(532|635)$").expect("static pattern"),
    minus_background: Regex::new(r"^.*- background$").expect("static pattern"),
    foreground: Regex::new(r"^f(532|635)").expect("static pattern"),
});

fn maybe_derived_signal(name: &str) -> bool {
    !GATES.ratio_like.is_match(name)
}

fn maybe_measured_signal(name: &str) -> bool {
    !GATES.spread_like.is_match(name) && !GATES.ratio_like.is_match(name)
}

fn maybe_ratio(name: &str) -> bool {
    !GATES.mismatch_excess.is_match(name)
}

fn maybe_background(name: &str, description: &str) -> bool {
    const NOT_BACKGROUND: [&str; 4] = [
        "background over the background",
        "above the background",
        "background subtracted",
        "background-corrected",
    ];
    if NOT_BACKGROUND.iter().any(|phrase| description.contains(phrase)) {
        return false;
    }
    !(GATES.subtracted_by_background.is_match(description)
        || GATES.minus_background_channel.is_match(name)
        || GATES.minus_background.is_match(name)
        || GATES.foreground.is_match(name))
}

/// Classifies columns against a borrowed set of rules. Holds no state of its own.
#[derive(Debug, Clone, Copy)]
pub struct QuantitationGuesser<'a> {
    rules: &'a QuantitationRules,
}

impl Default for QuantitationGuesser<'static> {
    fn default() -> Self {
        Self::new(QuantitationRules::builtin())
    }
}

impl<'a> QuantitationGuesser<'a> {
    pub fn new(rules: &'a QuantitationRules) -> Self {
        Self { rules }
    }

    pub fn guess(
        &self,
        name: &str,
        description: Option<&str>,
        example: Option<&ExampleValue>,
    ) -> QuantitationType {
        let name_lc = name.to_lowercase();
        let description_lc = description.map(str::to_lowercase).unwrap_or_default();

        let mut general_type = GeneralType::Quantitative;
        let mut scale = self.guess_scale(&name_lc, &description_lc);
        let mut standard_type = self.guess_standard_type(&name_lc, &description_lc);
        let mut representation = self.guess_representation(&name_lc, &description_lc, example);

        let is_background = self.guess_is_background(&name_lc, &description_lc)
            && maybe_background(&name_lc, &description_lc);
        let is_background_subtracted = any_match(&self.rules.background_subtracted_name, &name_lc)
            || any_match(&self.rules.background_subtracted_description, &description_lc);
        let is_normalized = any_match(&self.rules.normalized, &name_lc)
            || any_match(&self.rules.normalized, &description_lc);
        let is_ratio = maybe_ratio(&name_lc)
            && (any_match(&self.rules.ratio_name, &name_lc)
                || any_match(&self.rules.ratio_description, &description_lc));

        match standard_type {
            StandardType::Amount | StandardType::Count => {
                general_type = GeneralType::Quantitative;
            }
            StandardType::PresentAbsent => {
                general_type = GeneralType::Categorical;
                scale = ScaleType::Other;
            }
            StandardType::Coordinate => {
                representation = Representation::Int;
            }
            _ => {}
        }

        if name.contains("Probe ID")
            || description_lc.eq_ignore_ascii_case("probe set id")
            || name == "experiment name"
        {
            standard_type = StandardType::Other;
            scale = ScaleType::Unscaled;
            general_type = GeneralType::Categorical;
        }

        if description_lc.contains("qualitative") {
            general_type = GeneralType::Categorical;
        }

        let is_preferred = any_match(&self.rules.preferred_name, &name_lc);

        QuantitationType {
            name: name.to_string(),
            description: description.map(str::to_string),
            general_type,
            scale,
            standard_type,
            representation,
            is_background,
            is_background_subtracted,
            is_normalized,
            is_ratio,
            is_preferred,
            is_masked_preferred: false,
        }
    }

    fn guess_scale(&self, name: &str, description: &str) -> ScaleType {
        for entry in &self.rules.scale {
            if any_match(&entry.name, name) || any_match(&entry.description, description) {
                debug!(name, ?entry.value, "scale matched");
                return entry.value;
            }
        }
        ScaleType::Linear
    }

    fn guess_standard_type(&self, name: &str, description: &str) -> StandardType {
        for entry in &self.rules.standard {
            let is_quantity = matches!(entry.value, StandardType::Amount | StandardType::Count);
            if is_quantity && !(maybe_derived_signal(name) && maybe_measured_signal(name)) {
                continue;
            }
            if any_match(&entry.name, name) || any_match(&entry.description, description) {
                debug!(name, ?entry.value, "standard type matched");
                return entry.value;
            }
        }
        StandardType::Amount
    }

    fn guess_representation(
        &self,
        name: &str,
        description: &str,
        example: Option<&ExampleValue>,
    ) -> Representation {
        let mut could_be_double = true;
        let mut could_be_int = true;
        match example {
            Some(ExampleValue::Double(_)) => return Representation::Double,
            Some(ExampleValue::Int(_)) => return Representation::Int,
            Some(ExampleValue::Boolean(_)) => return Representation::Boolean,
            Some(ExampleValue::Text(text)) => {
                let trimmed = text.trim();
                if !trimmed.is_empty() && !trimmed.eq_ignore_ascii_case("null") {
                    could_be_double = trimmed.parse::<f64>().is_ok();
                    could_be_int = trimmed.parse::<i32>().is_ok();
                }
            }
            None => {}
        }

        let allowed = |value: Representation| match value {
            Representation::Double => could_be_double,
            Representation::Int => could_be_int,
            _ => true,
        };
        for entry in &self.rules.representation {
            if !allowed(entry.value) {
                continue;
            }
            // Names are also tested against the description rules: many column names are bare
            // words such as "area" that only the description tables know about.
            if any_match(&entry.name, name)
                || any_match(&entry.description, name)
                || any_match(&entry.description, description)
            {
                return entry.value;
            }
        }

        if could_be_double {
            Representation::Double
        } else {
            Representation::String
        }
    }

    fn guess_is_background(&self, name: &str, description: &str) -> bool {
        any_match(&self.rules.background_description, description)
            || any_match(&self.rules.background_name, name)
    }
}

/// Guess with the built-in tables.
pub fn guess_quantitation_type(
    name: &str,
    description: Option<&str>,
    example: Option<&ExampleValue>,
) -> QuantitationType {
    QuantitationGuesser::default().guess(name, description, example)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn value_column_is_preferred_and_normalized() {
        let qt = guess_quantitation_type("VALUE", Some("MAS5 signal"), None);
        assert_eq!(qt.standard_type, StandardType::Amount);
        assert_eq!(qt.scale, ScaleType::Log2);
        assert!(qt.is_preferred);
        assert!(qt.is_normalized);
        assert!(!qt.is_masked_preferred);
    }

    #[test]
    fn log_base_unknown_excludes_log2() {
        let qt = guess_quantitation_type("x1", Some("log transformed signal"), None);
        assert_eq!(qt.scale, ScaleType::LogBaseUnknown);
        let qt = guess_quantitation_type("x1", Some("log10 ratio"), None);
        assert_eq!(qt.scale, ScaleType::Log10);
    }

    #[test]
    fn invalid_extra_pattern_is_rejected() {
        let err = QuantitationRules::with_extra(&["(unclosed".to_string()], &[]).unwrap_err();
        assert_matches!(err, KiraError::InvalidPattern { .. });
    }

    #[test]
    fn rule_exclusion_applies() {
        let rule = Rule::new(".*normalized.*").unwrap().unless(".*unnormalized.*").unwrap();
        assert!(rule.matches("normalized signal"));
        assert!(!rule.matches("unnormalized signal"));
    }
}
