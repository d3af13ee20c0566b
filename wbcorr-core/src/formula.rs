//! Flat water-balance formulas over named time series.
//!
//! A formula such as `p-et-tr+supply_sw` is a sequence of terms, each a
//! variable name with the operator that combines it into a running
//! accumulator. Evaluation is a left fold starting from zero:
//!
//! ```text
//! acc = 0
//! acc = acc <op_1> var_1
//! acc = acc <op_2> var_2
//! ...
//! ```
//!
//! There is no operator precedence and no grouping: `a-b*c` evaluates as
//! `(a-b)*c`. Formulas are written so that the term being corrected is the
//! last one.
//!
//! # Examples
//!
//! ```
//! use wbcorr_core::formula::{Formula, Operator};
//!
//! let formula = Formula::parse("p-et-tr+supply_sw").unwrap();
//! assert_eq!(formula.terms()[0].operator, Operator::Add);
//! assert_eq!(formula.corrected_variable(), "supply_sw");
//! assert_eq!(formula.to_string(), "p-et-tr+supply_sw");
//! ```

use crate::errors::{WbError, WbResult};
use crate::timeseries::{cumulative_sum, finite, FloatValue, TimeSeries, Value};
use crate::timeseries_collection::TimeseriesCollection;
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl Operator {
    pub fn from_symbol(symbol: char) -> Option<Self> {
        match symbol {
            '+' => Some(Self::Add),
            '-' => Some(Self::Subtract),
            '*' => Some(Self::Multiply),
            '/' => Some(Self::Divide),
            _ => None,
        }
    }

    pub fn symbol(self) -> char {
        match self {
            Self::Add => '+',
            Self::Subtract => '-',
            Self::Multiply => '*',
            Self::Divide => '/',
        }
    }

    /// Combines the accumulator with an operand.
    ///
    /// Missing operands, division by zero and non-finite results all give a
    /// missing value.
    pub fn apply(self, lhs: Value, rhs: Value) -> Value {
        let (lhs, rhs) = (lhs?, rhs?);
        let result = match self {
            Self::Add => lhs + rhs,
            Self::Subtract => lhs - rhs,
            Self::Multiply => lhs * rhs,
            Self::Divide => {
                if rhs == 0.0 {
                    return None;
                }
                lhs / rhs
            }
        };
        finite(result)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Term {
    pub variable: String,
    pub operator: Operator,
}

/// Multiplies every occurrence of one variable by a trial factor during evaluation.
#[derive(Copy, Clone, Debug)]
pub struct Scaling<'a> {
    pub variable: &'a str,
    pub factor: FloatValue,
}

/// A parsed formula. Always holds at least one term.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Formula {
    terms: Vec<Term>,
}

impl Formula {
    /// Parses formula text.
    ///
    /// Variable names are runs of ASCII letters, digits and `_`. Exactly one
    /// of `+ - * /` must separate consecutive names (surrounding whitespace is
    /// ignored). A formula without a leading operator starts with an implicit
    /// `+`.
    pub fn parse(text: &str) -> WbResult<Self> {
        let trimmed = text.trim();
        let mut scanner = FormulaScanner::new(trimmed);
        let mut names: Vec<&str> = Vec::new();
        let mut operators: Vec<Operator> = Vec::new();

        while !scanner.is_done() {
            let run = scanner.take_separator();
            if !run.is_empty() {
                if scanner.is_done() {
                    return Err(WbError::malformed(
                        text,
                        format!("trailing operator '{}'", run.trim()),
                    ));
                }
                operators.push(parse_operator(text, run, names.last().copied())?);
            }
            names.push(scanner.take_name());
        }

        if names.is_empty() {
            return Err(WbError::malformed(text, "formula contains no variables"));
        }
        if names.len() > operators.len() {
            operators.insert(0, Operator::Add);
        }
        if names.len() != operators.len() {
            return Err(WbError::malformed(
                text,
                format!(
                    "{} variables but {} operators",
                    names.len(),
                    operators.len()
                ),
            ));
        }

        let terms = names
            .into_iter()
            .zip(operators)
            .map(|(name, operator)| Term {
                variable: name.to_string(),
                operator,
            })
            .collect();
        Ok(Self { terms })
    }

    /// Builds a formula from explicit terms.
    pub fn from_terms(terms: Vec<Term>) -> WbResult<Self> {
        if terms.is_empty() {
            return Err(WbError::malformed("", "formula contains no variables"));
        }
        Ok(Self { terms })
    }

    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    /// Distinct variable names in order of first appearance.
    pub fn variables(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for term in &self.terms {
            if !names.contains(&term.variable.as_str()) {
                names.push(&term.variable);
            }
        }
        names
    }

    /// The variable of the last term, which is the one a correction applies to.
    pub fn corrected_variable(&self) -> &str {
        self.terms
            .last()
            .map(|term| term.variable.as_str())
            .unwrap_or_default()
    }

    pub fn references(&self, variable: &str) -> bool {
        self.terms.iter().any(|term| term.variable == variable)
    }

    /// The same formula with every occurrence of `from` renamed to `to`.
    pub fn with_variable_renamed(&self, from: &str, to: &str) -> Self {
        let terms = self
            .terms
            .iter()
            .map(|term| Term {
                variable: if term.variable == from {
                    to.to_string()
                } else {
                    term.variable.clone()
                },
                operator: term.operator,
            })
            .collect();
        Self { terms }
    }

    /// Evaluates the formula element-wise over the whole date axis.
    pub fn evaluate(&self, series: &TimeseriesCollection) -> WbResult<TimeSeries> {
        let columns = self.resolve(series)?;
        let axis = columns[0];
        let values: Array1<Value> = (0..axis.len())
            .map(|index| self.value_at(&columns, index, None))
            .collect();
        axis.with_values(values)
    }

    /// Evaluates the formula at the given positions and returns the running
    /// sum in the order of `indices`.
    pub fn evaluate_cumulative(
        &self,
        series: &TimeseriesCollection,
        indices: &[usize],
    ) -> WbResult<Vec<Value>> {
        self.cumulative(series, indices, None)
    }

    /// [`Self::evaluate_cumulative`] with one variable multiplied by a factor.
    pub fn evaluate_cumulative_scaled(
        &self,
        series: &TimeseriesCollection,
        indices: &[usize],
        scaling: Scaling<'_>,
    ) -> WbResult<Vec<Value>> {
        self.cumulative(series, indices, Some(scaling))
    }

    fn cumulative(
        &self,
        series: &TimeseriesCollection,
        indices: &[usize],
        scaling: Option<Scaling<'_>>,
    ) -> WbResult<Vec<Value>> {
        let columns = self.resolve(series)?;
        let len = columns[0].len();
        if let Some(&index) = indices.iter().find(|&&index| index >= len) {
            return Err(WbError::IndexOutOfRange { index, len });
        }
        Ok(cumulative_sum(
            indices
                .iter()
                .map(|&index| self.value_at(&columns, index, scaling.as_ref())),
        ))
    }

    /// Looks up the series for every term and checks they share one date axis.
    fn resolve<'c>(&self, series: &'c TimeseriesCollection) -> WbResult<Vec<&'c TimeSeries>> {
        let columns = self
            .terms
            .iter()
            .map(|term| series.require(&term.variable))
            .collect::<WbResult<Vec<_>>>()?;
        let axis = *columns
            .first()
            .ok_or_else(|| WbError::malformed("", "formula contains no variables"))?;
        for (term, column) in self.terms.iter().zip(&columns) {
            if column.dates() != axis.dates() {
                return Err(WbError::AxisMismatch {
                    variable: term.variable.clone(),
                    expected: axis.len(),
                    found: column.len(),
                });
            }
        }
        Ok(columns)
    }

    fn value_at(
        &self,
        columns: &[&TimeSeries],
        index: usize,
        scaling: Option<&Scaling<'_>>,
    ) -> Value {
        self.terms
            .iter()
            .zip(columns)
            .fold(Some(0.0), |acc, (term, column)| {
                let operand = match scaling {
                    Some(s) if s.variable == term.variable => {
                        column.values()[index].map(|v| v * s.factor)
                    }
                    _ => column.values()[index],
                };
                term.operator.apply(acc, operand)
            })
    }
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, term) in self.terms.iter().enumerate() {
            if i > 0 || term.operator != Operator::Add {
                write!(f, "{}", term.operator)?;
            }
            write!(f, "{}", term.variable)?;
        }
        Ok(())
    }
}

impl FromStr for Formula {
    type Err = WbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn parse_operator(formula: &str, run: &str, previous: Option<&str>) -> WbResult<Operator> {
    let symbols: Vec<char> = run.chars().filter(|c| !c.is_whitespace()).collect();
    match symbols.as_slice() {
        [] => Err(WbError::malformed(
            formula,
            format!("missing operator after '{}'", previous.unwrap_or_default()),
        )),
        [symbol] => Operator::from_symbol(*symbol).ok_or_else(|| {
            WbError::malformed(formula, format!("unknown operator '{symbol}'"))
        }),
        _ => Err(WbError::malformed(
            formula,
            format!("unexpected operator sequence '{}'", run.trim()),
        )),
    }
}

/// Splits formula text into alternating separator and name runs.
struct FormulaScanner<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> FormulaScanner<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn is_done(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn take_while(&mut self, predicate: impl Fn(char) -> bool) -> &'a str {
        let start = self.pos;
        while let Some(c) = self.input[self.pos..].chars().next() {
            if !predicate(c) {
                break;
            }
            self.pos += c.len_utf8();
        }
        &self.input[start..self.pos]
    }

    fn take_separator(&mut self) -> &'a str {
        self.take_while(|c| !is_name_char(c))
    }

    fn take_name(&mut self) -> &'a str {
        self.take_while(is_name_char)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;
    use ndarray::array;

    fn dates(n: u32) -> Vec<NaiveDate> {
        (1..=n)
            .map(|m| NaiveDate::from_ymd_opt(2010, m, 1).unwrap())
            .collect()
    }

    fn collection(entries: &[(&str, Array1<f64>)]) -> TimeseriesCollection {
        let mut collection = TimeseriesCollection::new();
        for (name, values) in entries {
            let ts = TimeSeries::from_values(dates(values.len() as u32), values.clone()).unwrap();
            collection.add_timeseries(*name, ts).unwrap();
        }
        collection
    }

    fn names_and_operators(formula: &Formula) -> Vec<(&str, char)> {
        formula
            .terms()
            .iter()
            .map(|t| (t.variable.as_str(), t.operator.symbol()))
            .collect()
    }

    #[test]
    fn test_parse_prepends_implicit_add() {
        let formula = Formula::parse("p-et-tr+supply_sw").unwrap();
        assert_eq!(
            names_and_operators(&formula),
            vec![("p", '+'), ("et", '-'), ("tr", '-'), ("supply_sw", '+')]
        );
    }

    #[test]
    fn test_parse_keeps_explicit_leading_operator() {
        let formula = Formula::parse("-et+p").unwrap();
        assert_eq!(names_and_operators(&formula), vec![("et", '-'), ("p", '+')]);
        assert_eq!(formula.to_string(), "-et+p");
    }

    #[test]
    fn test_parse_ignores_whitespace_around_operators() {
        let formula = Formula::parse(" p - et / tr ").unwrap();
        assert_eq!(
            names_and_operators(&formula),
            vec![("p", '+'), ("et", '-'), ("tr", '/')]
        );
    }

    #[test]
    fn test_parse_rejects_unknown_operator() {
        assert!(matches!(
            Formula::parse("p$et"),
            Err(WbError::MalformedFormula { .. })
        ));
    }

    #[test]
    fn test_parse_rejects_malformed_text() {
        for text in ["", "   ", "p-et-", "p+-et", "p et", "+", "p^2"] {
            assert!(
                matches!(Formula::parse(text), Err(WbError::MalformedFormula { .. })),
                "{text:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_variables_and_renaming() {
        let formula = Formula::parse("p-tr+q-tr").unwrap();
        assert_eq!(formula.variables(), vec!["p", "tr", "q"]);
        assert_eq!(formula.corrected_variable(), "tr");
        let renamed = formula.with_variable_renamed("tr", "tr_new");
        assert_eq!(renamed.to_string(), "p-tr_new+q-tr_new");
    }

    #[test]
    fn test_evaluate_is_flat_left_to_right() {
        let series = collection(&[
            ("a", array![5.0, 2.0]),
            ("b", array![1.0, 1.0]),
            ("c", array![2.0, 3.0]),
        ]);
        let result = Formula::parse("a-b*c").unwrap().evaluate(&series).unwrap();
        // (a-b)*c, not a-(b*c)
        assert_eq!(result.values(), &array![Some(8.0), Some(3.0)]);
    }

    #[test]
    fn test_evaluate_is_deterministic() {
        let series = collection(&[
            ("p", array![10.0, 12.5, 7.0]),
            ("et", array![4.0, 6.1, 3.3]),
            ("tr", array![1.2, 2.2, 0.4]),
        ]);
        let formula = Formula::parse("p-et-tr").unwrap();
        let first = formula.evaluate(&series).unwrap();
        let second = formula.evaluate(&series).unwrap();
        assert_eq!(first, second);
        assert_relative_eq!(first.values()[1].unwrap(), 12.5 - 6.1 - 2.2);
    }

    #[test]
    fn test_division_by_zero_is_missing_at_that_position_only() {
        let series = collection(&[("a", array![4.0, 4.0, 4.0]), ("b", array![2.0, 0.0, f64::NAN])]);
        let result = Formula::parse("a/b").unwrap().evaluate(&series).unwrap();
        assert_eq!(result.values(), &array![Some(2.0), None, None]);
    }

    #[test]
    fn test_unknown_variable() {
        let series = collection(&[("p", array![1.0])]);
        let result = Formula::parse("p-et").unwrap().evaluate(&series);
        assert!(matches!(result, Err(WbError::UnknownVariable(name)) if name == "et"));
    }

    #[test]
    fn test_misaligned_series_are_rejected() {
        let series = collection(&[("p", array![1.0, 2.0]), ("et", array![1.0, 2.0, 3.0])]);
        let result = Formula::parse("p-et").unwrap().evaluate(&series);
        assert!(matches!(result, Err(WbError::AxisMismatch { .. })));
    }

    #[test]
    fn test_cumulative_over_index_subset() {
        let series = collection(&[
            ("p", array![1.0, 2.0, 3.0, 4.0]),
            ("et", array![0.5, 0.5, 0.5, 0.5]),
        ]);
        let formula = Formula::parse("p-et").unwrap();
        let cum = formula.evaluate_cumulative(&series, &[0, 2, 3]).unwrap();
        assert_eq!(cum, vec![Some(0.5), Some(3.0), Some(6.5)]);

        assert!(matches!(
            formula.evaluate_cumulative(&series, &[4]),
            Err(WbError::IndexOutOfRange { index: 4, len: 4 })
        ));
    }

    #[test]
    fn test_cumulative_scaled_multiplies_every_occurrence() {
        let series = collection(&[("p", array![10.0, 10.0]), ("tr", array![1.0, 2.0])]);
        let formula = Formula::parse("p-tr").unwrap();
        let cum = formula
            .evaluate_cumulative_scaled(
                &series,
                &[0, 1],
                Scaling {
                    variable: "tr",
                    factor: 3.0,
                },
            )
            .unwrap();
        assert_eq!(cum, vec![Some(7.0), Some(11.0)]);
    }

    #[test]
    fn test_json_roundtrip() {
        let formula = Formula::parse("p-et*k/q").unwrap();
        let text = serde_json::to_string(&formula).unwrap();
        let restored: Formula = serde_json::from_str(&text).unwrap();
        assert_eq!(restored, formula);
        assert_eq!(restored.to_string(), "p-et*k/q");
    }
}
