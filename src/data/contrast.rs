//! Contrasts: linear combinations of model coefficients.

use crate::error::{DaError, Result};
use serde::{Deserialize, Serialize};

/// A named weight vector over the model coefficients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contrast {
    /// Display name, usually the expression it was parsed from.
    pub name: String,
    /// One weight per coefficient, in design-matrix column order.
    pub weights: Vec<f64>,
}

impl Contrast {
    /// Parse an expression such as `"subgroupA - subgroupB"` or
    /// `"0.5*groupA + 0.5*groupB - groupC"` against the coefficient names.
    ///
    /// Names are matched against `coefficient_names` directly, longest name
    /// first, so levels containing `-`, `+` or spaces can be written as they
    /// are (`subgroupprogressive - subgroupnon-progressive`). A name can
    /// also be quoted with backticks. Repeated names accumulate.
    pub fn parse(expression: &str, coefficient_names: &[String]) -> Result<Self> {
        let expr = expression.trim();
        if expr.is_empty() {
            return Err(DaError::InvalidContrast("Empty contrast expression".to_string()));
        }

        // Longest first, so "a-b" is preferred over "a" followed by "- b".
        let mut by_length: Vec<usize> = (0..coefficient_names.len()).collect();
        by_length.sort_by_key(|&i| std::cmp::Reverse(coefficient_names[i].len()));

        let mut weights = vec![0.0; coefficient_names.len()];
        let mut rest = expr;
        let mut first = true;
        loop {
            rest = rest.trim_start();
            let sign = if let Some(r) = rest.strip_prefix('-') {
                rest = r;
                -1.0
            } else if let Some(r) = rest.strip_prefix('+') {
                rest = r;
                1.0
            } else if first {
                1.0
            } else {
                return Err(DaError::InvalidContrast(format!(
                    "Expected '+' or '-' before '{}' in contrast '{}'",
                    rest, expr
                )));
            };

            let (multiplier, r) = take_multiplier(rest.trim_start(), expr)?;
            let (idx, r) = take_coefficient(r.trim_start(), coefficient_names, &by_length, expr)?;
            weights[idx] += sign * multiplier;

            rest = r;
            first = false;
            if rest.trim().is_empty() {
                break;
            }
        }

        Ok(Self {
            name: expr.to_string(),
            weights,
        })
    }

    /// Build from explicit weights.
    pub fn from_vector(name: &str, weights: Vec<f64>, n_coefficients: usize) -> Result<Self> {
        if weights.len() != n_coefficients {
            return Err(DaError::InvalidContrast(format!(
                "Contrast '{}' has {} weights but the model has {} coefficients",
                name,
                weights.len(),
                n_coefficients
            )));
        }
        if weights.iter().any(|w| !w.is_finite()) {
            return Err(DaError::InvalidContrast(format!(
                "Contrast '{}' has non-finite weights",
                name
            )));
        }
        Ok(Self {
            name: name.to_string(),
            weights,
        })
    }

    /// Unit contrast selecting one coefficient.
    pub fn coefficient(name: &str, index: usize, n_coefficients: usize) -> Result<Self> {
        if index >= n_coefficients {
            return Err(DaError::InvalidContrast(format!(
                "Coefficient index {} out of range for {} coefficients",
                index, n_coefficients
            )));
        }
        let mut weights = vec![0.0; n_coefficients];
        weights[index] = 1.0;
        Ok(Self {
            name: name.to_string(),
            weights,
        })
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// True when every weight is zero.
    pub fn is_null(&self) -> bool {
        self.weights.iter().all(|&w| w == 0.0)
    }

    /// Check the contrast against a model with `n_coefficients` columns.
    pub fn validate(&self, n_coefficients: usize) -> Result<()> {
        if self.weights.len() != n_coefficients {
            return Err(DaError::InvalidContrast(format!(
                "Contrast '{}' has length {}, expected {}",
                self.name,
                self.weights.len(),
                n_coefficients
            )));
        }
        Ok(())
    }
}

/// Optional leading `<number> *`. Returns the multiplier and the remainder.
fn take_multiplier<'a>(input: &'a str, expr: &str) -> Result<(f64, &'a str)> {
    let mut end = 0;
    let mut prev = ' ';
    for (i, ch) in input.char_indices() {
        // The sign of an exponent ("1e-3") belongs to the number.
        let ok = ch.is_ascii_digit()
            || ch == '.'
            || (matches!(ch, 'e' | 'E') && i > 0)
            || (matches!(ch, '+' | '-') && matches!(prev, 'e' | 'E'));
        if !ok {
            break;
        }
        end = i + ch.len_utf8();
        prev = ch;
    }
    if end == 0 {
        return Ok((1.0, input));
    }
    let Some(after) = input[end..].trim_start().strip_prefix('*') else {
        return Ok((1.0, input));
    };
    let literal = &input[..end];
    let value: f64 = literal.parse().map_err(|_| {
        DaError::InvalidContrast(format!("Invalid multiplier '{}' in '{}'", literal, expr))
    })?;
    Ok((value, after))
}

/// A coefficient name, quoted or matched against the known names.
fn take_coefficient<'a>(
    input: &'a str,
    names: &[String],
    by_length: &[usize],
    expr: &str,
) -> Result<(usize, &'a str)> {
    if input.is_empty() {
        return Err(DaError::InvalidContrast(format!(
            "Contrast '{}' ends with a dangling operator",
            expr
        )));
    }

    if let Some(quoted) = input.strip_prefix('`') {
        let close = quoted.find('`').ok_or_else(|| {
            DaError::InvalidContrast(format!("Unterminated '`' in contrast '{}'", expr))
        })?;
        let name = &quoted[..close];
        let idx = names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| unknown_coefficient(name, names))?;
        return Ok((idx, &quoted[close + 1..]));
    }

    let at_boundary = |rest: &str| {
        rest.chars()
            .next()
            .map_or(true, |c| c.is_whitespace() || c == '+' || c == '-')
    };
    for &i in by_length {
        let name = names[i].as_str();
        if !name.is_empty() {
            if let Some(rest) = input.strip_prefix(name) {
                if at_boundary(rest) {
                    return Ok((i, rest));
                }
            }
        }
    }

    let token: String = input
        .chars()
        .take_while(|c| !c.is_whitespace() && !matches!(c, '+' | '-' | '*'))
        .collect();
    if token.is_empty() {
        return Err(DaError::InvalidContrast(format!(
            "Unexpected '{}' in contrast '{}'",
            input.chars().next().unwrap_or(' '),
            expr
        )));
    }
    Err(unknown_coefficient(&token, names))
}

fn unknown_coefficient(name: &str, names: &[String]) -> DaError {
    DaError::InvalidContrast(format!(
        "Unknown coefficient '{}' (available: {})",
        name,
        names.join(", ")
    ))
}
