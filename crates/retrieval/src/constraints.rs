//! Resolution of time windows, seasons and desired timescales into
//! independent row predicates.
//!
//! Every interval is left-open and right-closed: a row is admitted when its
//! value is `> lower` and `<= upper`, or `= lower` when both bounds coincide.

use chrono::{DateTime, Duration, Utc};
use std::fmt;
use tracing::debug;

use hydro_common::{MonthDay, Season, TimeScale, TimeWindowFilter};

/// A bound on one ordered column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimePredicate<T> {
    Equal(T),
    Range { after: Option<T>, up_to: Option<T> },
}

impl<T: PartialOrd + Copy> TimePredicate<T> {
    /// `None` when neither bound is present.
    pub fn between(lower: Option<T>, upper: Option<T>) -> Option<Self> {
        match (lower, upper) {
            (None, None) => None,
            (Some(l), Some(u)) if l == u => Some(TimePredicate::Equal(l)),
            (after, up_to) => Some(TimePredicate::Range { after, up_to }),
        }
    }

    pub fn admits(&self, value: T) -> bool {
        match *self {
            TimePredicate::Equal(t) => value == t,
            TimePredicate::Range { after, up_to } => {
                after.map_or(true, |a| value > a) && up_to.map_or(true, |u| value <= u)
            }
        }
    }

    pub fn lower(&self) -> Option<T> {
        match *self {
            TimePredicate::Equal(t) => Some(t),
            TimePredicate::Range { after, .. } => after,
        }
    }

    pub fn upper(&self) -> Option<T> {
        match *self {
            TimePredicate::Equal(t) => Some(t),
            TimePredicate::Range { up_to, .. } => up_to,
        }
    }
}

impl<T: fmt::Display> fmt::Display for TimePredicate<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimePredicate::Equal(t) => write!(f, "= {}", t),
            TimePredicate::Range { after, up_to } => {
                match after {
                    Some(a) => write!(f, "({}", a)?,
                    None => f.write_str("(-inf")?,
                }
                match up_to {
                    Some(u) => write!(f, ", {}]", u),
                    None => f.write_str(", +inf)"),
                }
            }
        }
    }
}

/// Valid-time bounds, noting which ends were inferred from forecast bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidTimePredicate {
    pub bounds: TimePredicate<DateTime<Utc>>,
    pub inferred_lower: bool,
    pub inferred_upper: bool,
}

impl ValidTimePredicate {
    pub fn is_inferred(&self) -> bool {
        self.inferred_lower || self.inferred_upper
    }
}

/// Column a season constraint applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeasonColumn {
    ReferenceTime,
    ValidTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeasonPredicate {
    pub season: Season,
    pub column: SeasonColumn,
}

impl SeasonPredicate {
    /// The bounds ordered earliest first, and whether they wrap the year end.
    pub fn ordered_days(&self) -> (MonthDay, MonthDay, bool) {
        if self.season.wraps_year_end() {
            (self.season.end, self.season.start, true)
        } else {
            (self.season.start, self.season.end, false)
        }
    }
}

/// One independent constraint on the rows of a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Predicate {
    ReferenceTime(TimePredicate<DateTime<Utc>>),
    LeadDuration(TimePredicate<Duration>),
    ValidTime(ValidTimePredicate),
    Season(SeasonPredicate),
}

/// What the resolver needs to know about a retrieval.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConstraintInputs {
    pub window: Option<TimeWindowFilter>,
    pub desired_time_scale: Option<TimeScale>,
    pub season: Option<Season>,
    /// Rows carry a reference time and lead duration.
    pub forecast_shaped: bool,
}

impl ConstraintInputs {
    pub fn new(forecast_shaped: bool) -> Self {
        Self {
            forecast_shaped,
            ..Self::default()
        }
    }

    pub fn with_window(mut self, window: Option<TimeWindowFilter>) -> Self {
        self.window = window;
        self
    }

    pub fn with_desired_time_scale(mut self, scale: Option<TimeScale>) -> Self {
        self.desired_time_scale = scale;
        self
    }

    pub fn with_season(mut self, season: Option<Season>) -> Self {
        self.season = season;
        self
    }
}

/// The minimal set of predicates for one retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResolvedConstraints {
    pub reference_time: Option<TimePredicate<DateTime<Utc>>>,
    pub lead_duration: Option<TimePredicate<Duration>>,
    pub valid_time: Option<ValidTimePredicate>,
    pub season: Option<SeasonPredicate>,
}

impl ResolvedConstraints {
    /// Constraints that admit every row.
    pub fn none() -> Self {
        Self::default()
    }

    /// Predicates in fixed order: reference time, lead duration, valid time, season.
    pub fn predicates(&self) -> Vec<Predicate> {
        let mut out = Vec::with_capacity(4);
        if let Some(p) = self.reference_time {
            out.push(Predicate::ReferenceTime(p));
        }
        if let Some(p) = self.lead_duration {
            out.push(Predicate::LeadDuration(p));
        }
        if let Some(p) = self.valid_time {
            out.push(Predicate::ValidTime(p));
        }
        if let Some(p) = self.season {
            out.push(Predicate::Season(p));
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.predicates().is_empty()
    }

    /// Evaluate every predicate against one row. A predicate on a column the
    /// row lacks rejects the row.
    pub fn admits(
        &self,
        valid_time: DateTime<Utc>,
        reference_time: Option<DateTime<Utc>>,
        lead_duration: Option<Duration>,
    ) -> bool {
        self.predicates().iter().all(|p| match p {
            Predicate::ReferenceTime(r) => reference_time.map_or(false, |t| r.admits(t)),
            Predicate::LeadDuration(l) => lead_duration.map_or(false, |d| l.admits(d)),
            Predicate::ValidTime(v) => v.bounds.admits(valid_time),
            Predicate::Season(s) => match s.column {
                SeasonColumn::ReferenceTime => {
                    reference_time.map_or(false, |t| s.season.contains_time(t))
                }
                SeasonColumn::ValidTime => s.season.contains_time(valid_time),
            },
        })
    }
}

/// Period to widen windows by, when the desired scale is not instantaneous.
fn widening_period(desired: Option<&TimeScale>) -> Option<Duration> {
    desired
        .filter(|s| !s.is_instantaneous())
        .and_then(|s| s.period_or_inferred())
}

/// Resolve the inputs into independent predicates. Pure and total.
pub fn resolve(inputs: &ConstraintInputs) -> ResolvedConstraints {
    let mut resolved = ResolvedConstraints::none();
    let widen = widening_period(inputs.desired_time_scale.as_ref());

    if let Some(window) = inputs.window.as_ref() {
        if inputs.forecast_shaped {
            resolved.reference_time = TimePredicate::between(
                window.earliest_reference_time,
                window.latest_reference_time,
            );
            resolved.lead_duration = resolve_lead_duration(window, widen);
        }
        resolved.valid_time = resolve_valid_time(window, widen);
    }

    resolved.season = inputs.season.map(|season| SeasonPredicate {
        season,
        column: if inputs.forecast_shaped {
            SeasonColumn::ReferenceTime
        } else {
            SeasonColumn::ValidTime
        },
    });

    debug!(
        forecast_shaped = inputs.forecast_shaped,
        predicates = resolved.predicates().len(),
        inferred_valid_time = resolved.valid_time.map_or(false, |v| v.is_inferred()),
        "Resolved retrieval constraints"
    );

    resolved
}

fn resolve_lead_duration(
    window: &TimeWindowFilter,
    widen: Option<Duration>,
) -> Option<TimePredicate<Duration>> {
    // A lowered bound that overflows is left open
    let lower = window.earliest_lead_duration.and_then(|lead| match widen {
        Some(period) => {
            let lowered = lead.checked_sub(&period);
            debug!(
                from_seconds = lead.num_seconds(),
                to = ?lowered,
                "Lowered earliest lead duration for the desired time scale"
            );
            lowered
        }
        None => Some(lead),
    });
    TimePredicate::between(lower, window.latest_lead_duration)
}

fn resolve_valid_time(
    window: &TimeWindowFilter,
    widen: Option<Duration>,
) -> Option<ValidTimePredicate> {
    // Inferred bounds outside the representable range are left open
    let (lower, inferred_lower) = match window.earliest_valid_time {
        Some(explicit) => (Some(explicit), false),
        None => match window.earliest_reference_time {
            Some(reference) => {
                let inferred = match window.earliest_lead_duration {
                    Some(lead) => reference
                        .checked_add_signed(lead)
                        .and_then(|t| t.checked_sub_signed(widen.unwrap_or_else(Duration::zero))),
                    None => Some(reference),
                };
                (inferred, inferred.is_some())
            }
            None => (None, false),
        },
    };

    let (upper, inferred_upper) = match window.latest_valid_time {
        Some(explicit) => (Some(explicit), false),
        None => match (window.latest_reference_time, window.latest_lead_duration) {
            (Some(reference), Some(lead)) => {
                let inferred = reference.checked_add_signed(lead);
                (inferred, inferred.is_some())
            }
            _ => (None, false),
        },
    };

    TimePredicate::between(lower, upper).map(|bounds| ValidTimePredicate {
        bounds,
        inferred_lower,
        inferred_upper,
    })
}
