//! Boolean rule evaluation.
//!
//! Rules gate location scores and constraint lifetimes. A rule is a tree of
//! attribute expressions and date expressions combined with `and`/`or`.
//! Evaluation is always against the injected pass time; the wall clock is
//! never consulted.
//!
//! Date-dependent rules also report when their truth value could next
//! change, feeding the pass-wide [`Recheck`] minimum that callers use to
//! schedule the next unprompted scheduler run.

use std::collections::BTreeMap;

use atrio_core::Score;
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};

/// Tracks the earliest future instant at which any evaluated rule could
/// change value.
///
/// The tracker only accepts instants strictly after the pass time, keeping
/// the result monotone and strictly in the future.
#[derive(Debug, Clone, Copy)]
pub struct Recheck {
    now: DateTime<Utc>,
    at: Option<DateTime<Utc>>,
}

impl Recheck {
    /// Creates a tracker for a pass evaluated at `now`.
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now, at: None }
    }

    /// Notes that a rule's value could change at `instant`.
    pub fn note(&mut self, instant: DateTime<Utc>) {
        if instant <= self.now {
            return;
        }
        match self.at {
            Some(current) if current <= instant => {}
            _ => self.at = Some(instant),
        }
    }

    /// The earliest future change instant seen, if any.
    #[must_use]
    pub fn at(&self) -> Option<DateTime<Utc>> {
        self.at
    }
}

/// How a rule combines its conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BooleanOp {
    /// Every condition must hold (vacuously true when empty).
    #[default]
    And,
    /// At least one condition must hold.
    Or,
}

/// Where a rule's score comes from when it passes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScoreSpec {
    /// A literal score.
    Literal(Score),
    /// Read the score from the named attribute of the node under test.
    Attribute(String),
}

/// A boolean rule tree.
#[derive(Debug, Clone, Default)]
pub struct Rule {
    /// The rule's XML ID, used in diagnostics.
    pub id: String,
    /// How conditions combine.
    pub op: BooleanOp,
    /// Optional role filter (interpreted by the constraint owner).
    pub role: Option<String>,
    /// Score applied when the rule passes (location rules only).
    pub score: Option<ScoreSpec>,
    /// The conditions, in declaration order.
    pub conditions: Vec<Condition>,
}

/// A single condition inside a rule.
#[derive(Debug, Clone)]
pub enum Condition {
    /// A nested sub-rule.
    Nested(Rule),
    /// A node attribute comparison.
    Attribute(AttrExpression),
    /// A date comparison against the pass time.
    Date(DateExpression),
}

/// Comparison operators for attribute expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrOp {
    /// Attribute < value.
    Lt,
    /// Attribute > value.
    Gt,
    /// Attribute <= value.
    Lte,
    /// Attribute >= value.
    Gte,
    /// Attribute == value.
    Eq,
    /// Attribute != value.
    Ne,
    /// The attribute exists, whatever its value.
    Defined,
    /// The attribute does not exist.
    NotDefined,
}

/// How attribute values are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValueKind {
    /// Numeric if both sides parse as integers, else string.
    #[default]
    Auto,
    /// Lexicographic string comparison.
    String,
    /// Integer comparison; non-numeric values never match.
    Integer,
    /// Dotted version comparison (`1.10` > `1.9`).
    Version,
}

/// A node attribute expression.
#[derive(Debug, Clone)]
pub struct AttrExpression {
    /// The attribute name (`#uname` and `#kind` are synthesized).
    pub attribute: String,
    /// The comparison operator.
    pub operation: AttrOp,
    /// The reference value (absent for defined/not-defined).
    pub value: Option<String>,
    /// The comparison type.
    pub kind: ValueKind,
}

/// A date expression evaluated against the pass time.
#[derive(Debug, Clone)]
pub enum DateExpression {
    /// True strictly after the instant.
    Gt(DateTime<Utc>),
    /// True strictly before the instant.
    Lt(DateTime<Utc>),
    /// True inside the closed range; either bound may be open.
    InRange {
        /// Inclusive start, if bounded below.
        start: Option<DateTime<Utc>>,
        /// Inclusive end, if bounded above.
        end: Option<DateTime<Utc>>,
    },
    /// True while the pass time matches every populated field.
    Spec(DateSpec),
}

/// An inclusive field range inside a [`DateSpec`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldRange {
    /// Low bound, inclusive.
    pub lo: u32,
    /// High bound, inclusive.
    pub hi: u32,
}

impl FieldRange {
    /// Parses `"9"` or `"9-17"`.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if let Some((lo, hi)) = text.split_once('-') {
            let lo = lo.trim().parse().ok()?;
            let hi = hi.trim().parse().ok()?;
            (lo <= hi).then_some(Self { lo, hi })
        } else {
            let v = text.parse().ok()?;
            Some(Self { lo: v, hi: v })
        }
    }

    fn contains(self, value: u32) -> bool {
        (self.lo..=self.hi).contains(&value)
    }
}

/// A recurring calendar specification.
///
/// Each populated field must match the corresponding component of the pass
/// time (in UTC) for the spec to hold. Weekdays are ISO (1 = Monday).
#[derive(Debug, Clone, Default)]
pub struct DateSpec {
    /// Seconds within the minute (0-59).
    pub seconds: Option<FieldRange>,
    /// Minutes within the hour (0-59).
    pub minutes: Option<FieldRange>,
    /// Hours within the day (0-23).
    pub hours: Option<FieldRange>,
    /// ISO weekday (1-7).
    pub weekdays: Option<FieldRange>,
    /// Day of month (1-31).
    pub monthdays: Option<FieldRange>,
    /// Day of year (1-366).
    pub yeardays: Option<FieldRange>,
    /// Month (1-12).
    pub months: Option<FieldRange>,
    /// Year.
    pub years: Option<FieldRange>,
}

impl DateSpec {
    fn matches(&self, now: DateTime<Utc>) -> bool {
        let checks = [
            (self.seconds, now.second()),
            (self.minutes, now.minute()),
            (self.hours, now.hour()),
            (self.weekdays, now.weekday().number_from_monday()),
            (self.monthdays, now.day()),
            (self.yeardays, now.ordinal()),
            (self.months, now.month()),
            (
                self.years,
                u32::try_from(now.year()).unwrap_or(u32::MAX),
            ),
        ];
        checks
            .into_iter()
            .all(|(range, value)| range.map_or(true, |r| r.contains(value)))
    }

    /// The next instant at which any populated field rolls over.
    ///
    /// Truth can only flip at the boundary of the finest populated field,
    /// so that boundary bounds the next change. This over-approximates
    /// (the value may be unchanged at the boundary) but never misses a
    /// transition.
    fn next_boundary(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let ts = now.timestamp();
        if self.seconds.is_some() {
            return DateTime::from_timestamp(ts + 1, 0);
        }
        if self.minutes.is_some() {
            return DateTime::from_timestamp(ts - ts.rem_euclid(60) + 60, 0);
        }
        if self.hours.is_some() {
            return DateTime::from_timestamp(ts - ts.rem_euclid(3600) + 3600, 0);
        }
        if self.weekdays.is_some() || self.monthdays.is_some() || self.yeardays.is_some() {
            return DateTime::from_timestamp(ts - ts.rem_euclid(86_400) + 86_400, 0);
        }
        if self.months.is_some() {
            let (year, month) = if now.month() == 12 {
                (now.year() + 1, 1)
            } else {
                (now.year(), now.month() + 1)
            };
            let first = NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)?;
            return Some(Utc.from_utc_datetime(&first));
        }
        if self.years.is_some() {
            let first = NaiveDate::from_ymd_opt(now.year() + 1, 1, 1)?.and_hms_opt(0, 0, 0)?;
            return Some(Utc.from_utc_datetime(&first));
        }
        None
    }
}

/// Evaluation inputs for one rule.
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    /// The pass time rules are evaluated against.
    pub now: DateTime<Utc>,
    /// Attributes of the node under test, if the rule targets a node.
    pub attributes: Option<&'a BTreeMap<String, String>>,
}

impl<'a> EvalContext<'a> {
    /// A context with no node, for lifetime and option rules.
    #[must_use]
    pub fn time_only(now: DateTime<Utc>) -> Self {
        Self {
            now,
            attributes: None,
        }
    }

    /// A context for the node with the given attribute map.
    #[must_use]
    pub fn for_node(now: DateTime<Utc>, attributes: &'a BTreeMap<String, String>) -> Self {
        Self {
            now,
            attributes: Some(attributes),
        }
    }
}

impl Rule {
    /// Evaluates the rule, noting possible future changes on `recheck`.
    #[must_use]
    pub fn evaluate(&self, ctx: &EvalContext<'_>, recheck: &mut Recheck) -> bool {
        let mut results = self
            .conditions
            .iter()
            .map(|cond| cond.evaluate(ctx, recheck));
        match self.op {
            BooleanOp::And => results.all(|r| r),
            BooleanOp::Or => results.any(|r| r),
        }
    }
}

impl Condition {
    fn evaluate(&self, ctx: &EvalContext<'_>, recheck: &mut Recheck) -> bool {
        match self {
            Self::Nested(rule) => rule.evaluate(ctx, recheck),
            Self::Attribute(expr) => expr.evaluate(ctx),
            Self::Date(expr) => expr.evaluate(ctx.now, recheck),
        }
    }
}

impl AttrExpression {
    fn evaluate(&self, ctx: &EvalContext<'_>) -> bool {
        let actual = ctx
            .attributes
            .and_then(|attrs| attrs.get(&self.attribute))
            .map(String::as_str);

        match self.operation {
            AttrOp::Defined => return actual.is_some(),
            AttrOp::NotDefined => return actual.is_none(),
            _ => {}
        }

        let (Some(actual), Some(expected)) = (actual, self.value.as_deref()) else {
            return false;
        };

        let ordering = match self.kind {
            ValueKind::String => actual.cmp(expected),
            ValueKind::Integer => {
                let (Ok(a), Ok(b)) = (actual.parse::<i64>(), expected.parse::<i64>()) else {
                    return false;
                };
                a.cmp(&b)
            }
            ValueKind::Version => compare_versions(actual, expected),
            ValueKind::Auto => match (actual.parse::<i64>(), expected.parse::<i64>()) {
                (Ok(a), Ok(b)) => a.cmp(&b),
                _ => actual.cmp(expected),
            },
        };

        match self.operation {
            AttrOp::Lt => ordering.is_lt(),
            AttrOp::Gt => ordering.is_gt(),
            AttrOp::Lte => ordering.is_le(),
            AttrOp::Gte => ordering.is_ge(),
            AttrOp::Eq => ordering.is_eq(),
            AttrOp::Ne => ordering.is_ne(),
            AttrOp::Defined | AttrOp::NotDefined => unreachable!("handled above"),
        }
    }
}

impl DateExpression {
    fn evaluate(&self, now: DateTime<Utc>, recheck: &mut Recheck) -> bool {
        match self {
            Self::Gt(instant) => {
                if now > *instant {
                    true
                } else {
                    // Becomes true one tick after the instant.
                    recheck.note(*instant + chrono::Duration::seconds(1));
                    false
                }
            }
            Self::Lt(instant) => {
                if now < *instant {
                    recheck.note(*instant);
                    true
                } else {
                    false
                }
            }
            Self::InRange { start, end } => {
                if let Some(start) = start {
                    if now < *start {
                        recheck.note(*start);
                        return false;
                    }
                }
                if let Some(end) = end {
                    if now > *end {
                        return false;
                    }
                    recheck.note(*end + chrono::Duration::seconds(1));
                }
                true
            }
            Self::Spec(spec) => {
                if let Some(boundary) = spec.next_boundary(now) {
                    recheck.note(boundary);
                }
                spec.matches(now)
            }
        }
    }
}

/// Compares dotted version strings component-wise, missing parts being 0.
#[must_use]
pub fn compare_versions(a: &str, b: &str) -> std::cmp::Ordering {
    let parse = |s: &str| -> Vec<i64> {
        s.split('.')
            .map(|part| part.trim().parse().unwrap_or(0))
            .collect()
    };
    let (va, vb) = (parse(a), parse(b));
    let len = va.len().max(vb.len());
    for i in 0..len {
        let x = va.get(i).copied().unwrap_or(0);
        let y = vb.get(i).copied().unwrap_or(0);
        match x.cmp(&y) {
            std::cmp::Ordering::Equal => {}
            other => return other,
        }
    }
    std::cmp::Ordering::Equal
}

/// Parses a configuration timestamp.
///
/// Accepts RFC 3339 (`2026-08-01T09:00:00Z`), a space-separated local
/// form (`2026-08-01 09:00:00`), and a bare date (midnight UTC).
#[must_use]
pub fn parse_datetime(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?));
    }
    None
}
