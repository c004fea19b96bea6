//! R-style model formulas (`~ 0 + group`, `~ group + age`, `~ group * batch`).

use crate::error::{DaError, Result};
use serde::{Deserialize, Serialize};

/// A non-intercept term of a formula.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Term {
    /// Main effect of one variable.
    Main(String),
    /// Interaction of two or more variables (`a:b`, `a:b:c`).
    Interaction(Vec<String>),
}

impl Term {
    pub fn variables(&self) -> Vec<&str> {
        match self {
            Term::Main(v) => vec![v.as_str()],
            Term::Interaction(vs) => vs.iter().map(String::as_str).collect(),
        }
    }
}

impl std::fmt::Display for Term {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Term::Main(v) => write!(f, "{}", v),
            Term::Interaction(vs) => write!(f, "{}", vs.join(":")),
        }
    }
}

/// A parsed right-hand-side formula.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Formula {
    /// Whether the model has an intercept column.
    pub intercept: bool,
    /// Terms in model-matrix column order.
    pub terms: Vec<Term>,
}

impl Formula {
    /// Parse a formula string.
    ///
    /// `0`, `-1` anywhere on the right-hand side remove the intercept; `1`
    /// keeps it. `a*b` expands to `a + b + a:b` (and all higher-order
    /// combinations for more factors).
    ///
    /// ```
    /// use moderated_da::data::Formula;
    /// let f = Formula::parse("~ 0 + subgroup").unwrap();
    /// assert!(!f.intercept);
    /// assert_eq!(f.terms.len(), 1);
    /// ```
    pub fn parse(formula: &str) -> Result<Self> {
        let rhs = formula
            .trim()
            .strip_prefix('~')
            .ok_or_else(|| DaError::FormulaParse("Formula must start with '~'".to_string()))?
            .trim();
        if rhs.is_empty() {
            return Err(DaError::FormulaParse(
                "Formula right-hand side is empty".to_string(),
            ));
        }

        let mut intercept = true;
        let mut terms: Vec<Term> = Vec::new();

        for (sign, token) in split_signed(rhs)? {
            match (sign, token.as_str()) {
                ('+', "0") | ('-', "1") => intercept = false,
                ('+', "1") => intercept = true,
                ('-', other) => {
                    return Err(DaError::FormulaParse(format!(
                        "Term removal is only supported for the intercept, got '-{}'",
                        other
                    )))
                }
                (_, t) if t.contains('*') => {
                    let factors = split_factors(t, '*')?;
                    for term in expand_star(&factors) {
                        push_unique(&mut terms, term);
                    }
                }
                (_, t) if t.contains(':') => {
                    push_unique(&mut terms, Term::Interaction(split_factors(t, ':')?));
                }
                (_, t) => {
                    validate_name(t)?;
                    push_unique(&mut terms, Term::Main(t.to_string()));
                }
            }
        }

        if terms.is_empty() && !intercept {
            return Err(DaError::FormulaParse(
                "Formula must have at least one term".to_string(),
            ));
        }

        // Lower-order terms come first, as in model.matrix.
        terms.sort_by_key(|t| t.variables().len());

        Ok(Self { intercept, terms })
    }

    /// Distinct variable names used by the formula (sorted).
    pub fn variables(&self) -> Vec<&str> {
        let mut vars: Vec<&str> = self.terms.iter().flat_map(|t| t.variables()).collect();
        vars.sort_unstable();
        vars.dedup();
        vars
    }

    pub fn uses_variable(&self, name: &str) -> bool {
        self.terms.iter().any(|t| t.variables().contains(&name))
    }
}

impl std::fmt::Display for Formula {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut parts: Vec<String> = Vec::new();
        if !self.intercept {
            parts.push("0".to_string());
        }
        parts.extend(self.terms.iter().map(|t| t.to_string()));
        if parts.is_empty() {
            parts.push("1".to_string());
        }
        write!(f, "~ {}", parts.join(" + "))
    }
}

/// Split on top-level `+`/`-`, keeping the sign of each token.
fn split_signed(rhs: &str) -> Result<Vec<(char, String)>> {
    let mut out = Vec::new();
    let mut sign = '+';
    let mut current = String::new();
    for ch in rhs.chars() {
        match ch {
            '+' | '-' => {
                let token = current.trim().to_string();
                if !token.is_empty() {
                    out.push((sign, token));
                } else if !(out.is_empty() && sign == '+' && ch == '-') {
                    // Only a leading "-1" may start without a term.
                    return Err(DaError::FormulaParse(format!(
                        "Unexpected '{}' in formula",
                        ch
                    )));
                }
                current.clear();
                sign = ch;
            }
            _ => current.push(ch),
        }
    }
    let token = current.trim().to_string();
    if token.is_empty() {
        return Err(DaError::FormulaParse(
            "Formula ends with a dangling operator".to_string(),
        ));
    }
    out.push((sign, token));
    Ok(out)
}

fn split_factors(term: &str, sep: char) -> Result<Vec<String>> {
    let factors: Vec<String> = term.split(sep).map(|s| s.trim().to_string()).collect();
    if factors.len() < 2 {
        return Err(DaError::FormulaParse(format!("Invalid term: {}", term)));
    }
    for f in &factors {
        validate_name(f)?;
    }
    Ok(factors)
}

fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '.');
    if valid {
        Ok(())
    } else {
        Err(DaError::FormulaParse(format!("Invalid variable name '{}'", name)))
    }
}

/// All non-empty combinations of the factors, in increasing order.
fn expand_star(factors: &[String]) -> Vec<Term> {
    let n = factors.len();
    let mut subsets: Vec<Vec<String>> = (1u32..(1 << n))
        .map(|mask| {
            (0..n)
                .filter(|i| mask & (1 << i) != 0)
                .map(|i| factors[i].clone())
                .collect()
        })
        .collect();
    subsets.sort_by_key(|s| s.len());
    subsets
        .into_iter()
        .map(|mut s| {
            if s.len() == 1 {
                Term::Main(s.remove(0))
            } else {
                Term::Interaction(s)
            }
        })
        .collect()
}

fn push_unique(terms: &mut Vec<Term>, term: Term) {
    if !terms.contains(&term) {
        terms.push(term);
    }
}
