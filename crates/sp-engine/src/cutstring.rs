//! Named selection cuts and event weights.
//!
//! Both sets are ordered and keyed by name. A [`Cuts`] set expands into a
//! single `&&`-joined selection string, a [`Weights`] set into a `*`-joined
//! weight expression; the string forms feed the estimation backend and the
//! request identity, so their shape is stable.

use std::fmt;

use sp_core::{Error, Result};

trait Term: Clone {
    const KIND: &'static str;
    fn name(&self) -> &str;
}

#[derive(Debug, Clone, PartialEq)]
struct Terms<T> {
    items: Vec<T>,
}

impl<T> Default for Terms<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<T: Term> Terms<T> {
    fn position(&self, name: &str) -> Option<usize> {
        self.items.iter().position(|t| t.name() == name)
    }

    fn get(&self, name: &str) -> Option<&T> {
        self.position(name).map(|i| &self.items[i])
    }

    fn add(&mut self, term: T) -> Result<()> {
        if self.position(term.name()).is_some() {
            return Err(Error::DuplicateName(format!("{} '{}'", T::KIND, term.name())));
        }
        self.items.push(term);
        Ok(())
    }

    fn remove(&mut self, name: &str) -> Result<T> {
        match self.position(name) {
            Some(i) => Ok(self.items.remove(i)),
            None => Err(Error::NotFound(format!("{} '{}'", T::KIND, name))),
        }
    }

    fn replace(&mut self, name: &str, term: T) -> Result<()> {
        if term.name() != name && self.position(term.name()).is_some() {
            return Err(Error::DuplicateName(format!("{} '{}'", T::KIND, term.name())));
        }
        self.remove(name)?;
        self.add(term)
    }

    fn extend(&mut self, other: &Terms<T>) -> Result<()> {
        for term in &other.items {
            self.add(term.clone())?;
        }
        Ok(())
    }
}

/// A named selection expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Cut {
    name: String,
    expression: String,
}

impl Cut {
    /// `Cut::new("q_1*q_2<0", "os")`.
    pub fn new(expression: impl Into<String>, name: impl Into<String>) -> Self {
        Self { name: name.into(), expression: expression.into() }
    }

    /// Cut name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Selection expression.
    pub fn expression(&self) -> &str {
        &self.expression
    }
}

impl Term for Cut {
    const KIND: &'static str = "cut";
    fn name(&self) -> &str {
        &self.name
    }
}

/// Ordered set of cuts with unique names.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Cuts(Terms<Cut>);

impl Cuts {
    /// Empty set (expands to `"1"`).
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from cuts in order; fails on a repeated name.
    pub fn from_cuts(cuts: impl IntoIterator<Item = Cut>) -> Result<Self> {
        let mut set = Self::new();
        for cut in cuts {
            set.add(cut)?;
        }
        Ok(set)
    }

    /// Append a cut. `DuplicateName` if the name is taken.
    pub fn add(&mut self, cut: Cut) -> Result<()> {
        self.0.add(cut)
    }

    /// Remove and return the named cut. `NotFound` if absent.
    pub fn remove(&mut self, name: &str) -> Result<Cut> {
        self.0.remove(name)
    }

    /// Remove `name`, then append `cut`.
    pub fn replace(&mut self, name: &str, cut: Cut) -> Result<()> {
        self.0.replace(name, cut)
    }

    /// Concatenate `other` into `self`; fails on the first duplicate name.
    pub fn extend(&mut self, other: &Cuts) -> Result<()> {
        self.0.extend(&other.0)
    }

    /// Look up a cut by name.
    pub fn get(&self, name: &str) -> Option<&Cut> {
        self.0.get(name)
    }

    /// Number of cuts.
    pub fn len(&self) -> usize {
        self.0.items.len()
    }

    /// True if there are no cuts.
    pub fn is_empty(&self) -> bool {
        self.0.items.is_empty()
    }

    /// Cuts in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Cut> {
        self.0.items.iter()
    }

    /// `(e1)&&(e2)&&...`, or `"1"` for the empty set.
    pub fn expand(&self) -> String {
        if self.is_empty() {
            return "1".to_string();
        }
        self.iter().map(|c| format!("({})", c.expression)).collect::<Vec<_>>().join("&&")
    }
}

impl fmt::Display for Cuts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expand())
    }
}

/// A named weight expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Weight {
    name: String,
    expression: String,
}

impl Weight {
    /// `Weight::new("puweight", "puweight")`.
    pub fn new(expression: impl Into<String>, name: impl Into<String>) -> Self {
        Self { name: name.into(), expression: expression.into() }
    }

    /// Weight name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Weight expression.
    pub fn expression(&self) -> &str {
        &self.expression
    }
}

impl Term for Weight {
    const KIND: &'static str = "weight";
    fn name(&self) -> &str {
        &self.name
    }
}

/// Ordered set of weights with unique names.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Weights(Terms<Weight>);

impl Weights {
    /// Empty set (extracts to `"1.0"`).
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from weights in order; fails on a repeated name.
    pub fn from_weights(weights: impl IntoIterator<Item = Weight>) -> Result<Self> {
        let mut set = Self::new();
        for weight in weights {
            set.add(weight)?;
        }
        Ok(set)
    }

    /// Append a weight. `DuplicateName` if the name is taken.
    pub fn add(&mut self, weight: Weight) -> Result<()> {
        self.0.add(weight)
    }

    /// Remove and return the named weight. `NotFound` if absent.
    pub fn remove(&mut self, name: &str) -> Result<Weight> {
        self.0.remove(name)
    }

    /// Remove `name`, then append `weight`.
    pub fn replace(&mut self, name: &str, weight: Weight) -> Result<()> {
        self.0.replace(name, weight)
    }

    /// Square the named weight in place: `e` becomes `(e)*(e)`.
    pub fn square(&mut self, name: &str) -> Result<()> {
        let i = self
            .0
            .position(name)
            .ok_or_else(|| Error::NotFound(format!("weight '{}'", name)))?;
        let w = &mut self.0.items[i];
        w.expression = format!("({0})*({0})", w.expression);
        Ok(())
    }

    /// Concatenate `other` into `self`; fails on the first duplicate name.
    pub fn extend(&mut self, other: &Weights) -> Result<()> {
        self.0.extend(&other.0)
    }

    /// Look up a weight by name.
    pub fn get(&self, name: &str) -> Option<&Weight> {
        self.0.get(name)
    }

    /// Number of weights.
    pub fn len(&self) -> usize {
        self.0.items.len()
    }

    /// True if there are no weights.
    pub fn is_empty(&self) -> bool {
        self.0.items.is_empty()
    }

    /// Weights in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Weight> {
        self.0.items.iter()
    }

    /// `(w1)*(w2)*...`, or `"1.0"` for the empty set.
    pub fn extract(&self) -> String {
        if self.is_empty() {
            return "1.0".to_string();
        }
        self.iter().map(|w| format!("({})", w.expression)).collect::<Vec<_>>().join("*")
    }
}

impl fmt::Display for Weights {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.extract())
    }
}
