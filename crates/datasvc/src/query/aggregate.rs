use std::cmp::Ordering;
use std::collections::HashSet;

use super::bind::{AggregateFunction, BoundAggregate};
use super::eval::compare;
use crate::errors::{Result, runtime};
use crate::scalar::{Scalar, ScalarKey};

#[derive(Debug)]
enum AggregateState {
    Count(i64),
    /// Running sum, `None` until the first non-null input.
    Sum(Option<Scalar>),
    Avg { sum: f64, count: i64 },
    Min(Option<Scalar>),
    Max(Option<Scalar>),
}

/// Accumulates input values for one aggregate in one group.
///
/// Nulls are ignored by every aggregate.
#[derive(Debug)]
pub(crate) struct Accumulator {
    state: AggregateState,
    /// Values already seen, only tracked for DISTINCT aggregates.
    seen: Option<HashSet<ScalarKey>>,
}

impl Accumulator {
    pub fn new(agg: &BoundAggregate) -> Self {
        let state = match agg.func {
            AggregateFunction::Count => AggregateState::Count(0),
            AggregateFunction::Sum => AggregateState::Sum(None),
            AggregateFunction::Avg => AggregateState::Avg { sum: 0.0, count: 0 },
            AggregateFunction::Min => AggregateState::Min(None),
            AggregateFunction::Max => AggregateState::Max(None),
        };
        Accumulator {
            state,
            seen: agg.distinct.then(HashSet::new),
        }
    }

    /// Add a value. `None` counts a row for `count(*)`.
    pub fn update(&mut self, value: Option<Scalar>) -> Result<()> {
        let value = match value {
            None => {
                if let AggregateState::Count(n) = &mut self.state {
                    *n += 1;
                }
                return Ok(());
            }
            Some(Scalar::Null) => return Ok(()),
            Some(v) => v,
        };

        if let Some(seen) = &mut self.seen {
            if !seen.insert(ScalarKey::from(&value)) {
                return Ok(());
            }
        }

        match &mut self.state {
            AggregateState::Count(n) => *n += 1,
            AggregateState::Sum(sum) => {
                let next = match (sum.take(), value) {
                    (None, v @ (Scalar::Int(_) | Scalar::Float(_))) => v,
                    (Some(Scalar::Int(a)), Scalar::Int(b)) => Scalar::Int(
                        a.checked_add(b)
                            .ok_or_else(|| runtime!("Integer overflow in sum"))?,
                    ),
                    (Some(acc), v @ (Scalar::Int(_) | Scalar::Float(_))) => {
                        let total = as_f64(&acc) + as_f64(&v);
                        if !total.is_finite() {
                            return Err(runtime!("Float overflow in sum"));
                        }
                        Scalar::Float(total)
                    }
                    (_, v) => return Err(runtime!("Cannot sum values of type {}", v.type_name())),
                };
                *sum = Some(next);
            }
            AggregateState::Avg { sum, count } => {
                if !matches!(value, Scalar::Int(_) | Scalar::Float(_)) {
                    return Err(runtime!(
                        "Cannot average values of type {}",
                        value.type_name()
                    ));
                }
                *sum += as_f64(&value);
                *count += 1;
            }
            AggregateState::Min(current) => keep_if(current, value, Ordering::Less)?,
            AggregateState::Max(current) => keep_if(current, value, Ordering::Greater)?,
        }

        Ok(())
    }

    pub fn finish(self) -> Result<Scalar> {
        Ok(match self.state {
            AggregateState::Count(n) => Scalar::Int(n),
            AggregateState::Sum(sum) => sum.unwrap_or(Scalar::Null),
            AggregateState::Avg { count: 0, .. } => Scalar::Null,
            AggregateState::Avg { sum, count } => {
                let avg = sum / count as f64;
                if !avg.is_finite() {
                    return Err(runtime!("Float overflow in avg"));
                }
                Scalar::Float(avg)
            }
            AggregateState::Min(v) | AggregateState::Max(v) => v.unwrap_or(Scalar::Null),
        })
    }
}

/// Replace `current` with `value` if `value` compares as `wanted` against it.
fn keep_if(current: &mut Option<Scalar>, value: Scalar, wanted: Ordering) -> Result<()> {
    match current {
        None => *current = Some(value),
        Some(existing) => {
            if compare(&value, existing)? == Some(wanted) {
                *existing = value;
            }
        }
    }
    Ok(())
}

fn as_f64(v: &Scalar) -> f64 {
    match v {
        Scalar::Int(i) => *i as f64,
        Scalar::Float(f) => *f,
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::DatasvcError;

    fn run(func: AggregateFunction, distinct: bool, values: Vec<Scalar>) -> Result<Scalar> {
        let agg = BoundAggregate {
            func,
            arg: None,
            distinct,
        };
        let mut acc = Accumulator::new(&agg);
        for v in values {
            acc.update(Some(v))?;
        }
        acc.finish()
    }

    #[test]
    fn count_star_counts_rows() {
        let agg = BoundAggregate {
            func: AggregateFunction::Count,
            arg: None,
            distinct: false,
        };
        let mut acc = Accumulator::new(&agg);
        acc.update(None).unwrap();
        acc.update(None).unwrap();
        assert_eq!(Scalar::Int(2), acc.finish().unwrap());
    }

    #[test]
    fn count_skips_nulls() {
        let got = run(
            AggregateFunction::Count,
            false,
            vec![Scalar::Int(1), Scalar::Null, Scalar::Int(1)],
        );
        assert_eq!(Scalar::Int(2), got.unwrap());
    }

    #[test]
    fn count_distinct() {
        let got = run(
            AggregateFunction::Count,
            true,
            vec![Scalar::Int(1), Scalar::Float(1.0), Scalar::Int(2)],
        );
        assert_eq!(Scalar::Int(2), got.unwrap());
    }

    #[test]
    fn sums() {
        assert_eq!(
            Scalar::Int(6),
            run(AggregateFunction::Sum, false, vec![Scalar::Int(1), Scalar::Int(5)]).unwrap()
        );
        assert_eq!(
            Scalar::Float(6.5),
            run(AggregateFunction::Sum, false, vec![Scalar::Int(1), Scalar::Float(5.5)]).unwrap()
        );
        assert_eq!(
            Scalar::Null,
            run(AggregateFunction::Sum, false, vec![Scalar::Null]).unwrap()
        );

        let err = run(
            AggregateFunction::Sum,
            false,
            vec![Scalar::Int(i64::MAX), Scalar::Int(1)],
        )
        .unwrap_err();
        assert!(matches!(err, DatasvcError::QueryRuntime { .. }));

        run(AggregateFunction::Sum, false, vec![Scalar::text("a")]).unwrap_err();
    }

    #[test]
    fn avg() {
        assert_eq!(
            Scalar::Float(2.0),
            run(
                AggregateFunction::Avg,
                false,
                vec![Scalar::Int(1), Scalar::Null, Scalar::Int(3)]
            )
            .unwrap()
        );
        assert_eq!(
            Scalar::Null,
            run(AggregateFunction::Avg, false, vec![]).unwrap()
        );
    }

    #[test]
    fn min_max() {
        let values = vec![Scalar::text("b"), Scalar::text("a"), Scalar::text("c")];
        assert_eq!(
            Scalar::text("a"),
            run(AggregateFunction::Min, false, values.clone()).unwrap()
        );
        assert_eq!(
            Scalar::text("c"),
            run(AggregateFunction::Max, false, values).unwrap()
        );

        run(
            AggregateFunction::Max,
            false,
            vec![Scalar::Int(1), Scalar::text("a")],
        )
        .unwrap_err();
    }
}
