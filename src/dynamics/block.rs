use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{GridError, GridResult};
use crate::symbolic::{Expr, Var};

/// Tag under which a block publishes one of its variables to outside callers.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ExternalTag {
    /// Active power set-point.
    P,
    /// Reactive power set-point.
    Q,
    /// Voltage magnitude.
    Vm,
    /// Voltage angle.
    Va,
    Named(String),
}

/// Composable DAE fragment.
///
/// `state_eqs[i]` is the time derivative of `state_vars[i]`,
/// `algebraic_eqs[i]` is a residual that must vanish and is paired with
/// `algebraic_vars[i]`. Parameters are driven from outside, either through
/// `parameters_eqs` (explicit expressions of time) or through events.
#[derive(Clone, Debug, Default)]
pub struct Block {
    state_eqs: Vec<Expr>,
    state_vars: Vec<Var>,
    algebraic_eqs: Vec<Expr>,
    algebraic_vars: Vec<Var>,
    parameters: Vec<Var>,
    parameters_eqs: Vec<Option<Expr>>,
    external_mapping: HashMap<ExternalTag, Var>,
    children: Vec<Block>,
}

/// Flattened view of a block tree, depth-first, self before children.
#[derive(Clone, Debug, Default)]
pub struct FlatBlock {
    pub state_eqs: Vec<Expr>,
    pub state_vars: Vec<Var>,
    pub algebraic_eqs: Vec<Expr>,
    pub algebraic_vars: Vec<Var>,
    pub parameters: Vec<Var>,
    /// One entry per parameter; `None` for event-driven parameters.
    pub parameters_eqs: Vec<Option<Expr>>,
}

impl Block {
    pub fn builder() -> BlockBuilder {
        BlockBuilder::default()
    }

    /// Builds a block from explicit lists.
    ///
    /// Fails with [`GridError::ShapeMismatch`] when an equation list and its
    /// variable list differ in length, or when `parameters_eqs` is neither
    /// empty nor one-to-one with `parameters`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        state_eqs: Vec<Expr>,
        state_vars: Vec<Var>,
        algebraic_eqs: Vec<Expr>,
        algebraic_vars: Vec<Var>,
        parameters: Vec<Var>,
        parameters_eqs: Vec<Expr>,
        external_mapping: HashMap<ExternalTag, Var>,
        children: Vec<Block>,
    ) -> GridResult<Self> {
        check_shape("state", state_eqs.len(), state_vars.len())?;
        check_shape("algebraic", algebraic_eqs.len(), algebraic_vars.len())?;
        let parameters_eqs = if parameters_eqs.is_empty() {
            vec![None; parameters.len()]
        } else {
            check_shape("parameter", parameters_eqs.len(), parameters.len())?;
            parameters_eqs.into_iter().map(Some).collect()
        };
        Ok(Block {
            state_eqs,
            state_vars,
            algebraic_eqs,
            algebraic_vars,
            parameters,
            parameters_eqs,
            external_mapping,
            children,
        })
    }

    pub fn state_vars(&self) -> &[Var] {
        &self.state_vars
    }

    pub fn algebraic_vars(&self) -> &[Var] {
        &self.algebraic_vars
    }

    pub fn parameters(&self) -> &[Var] {
        &self.parameters
    }

    pub fn children(&self) -> &[Block] {
        &self.children
    }

    /// Variable published under `tag` by this block itself.
    pub fn external(&self, tag: &ExternalTag) -> Option<Var> {
        self.external_mapping.get(tag).copied()
    }

    /// Every variable published under `tag` in the tree, in flattening order.
    pub fn find_external(&self, tag: &ExternalTag) -> Vec<Var> {
        let mut out = Vec::new();
        self.walk(&mut |b| {
            if let Some(v) = b.external(tag) {
                out.push(v);
            }
        });
        out
    }

    fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Block)) {
        f(self);
        for c in &self.children {
            c.walk(f);
        }
    }

    /// Concatenates this block and its descendants, depth-first.
    ///
    /// A variable may be read by any number of equations, but it can be
    /// registered only once, under a single kind. A second registration fails
    /// with [`GridError::DuplicateVariable`].
    pub fn flatten(&self) -> GridResult<FlatBlock> {
        let mut flat = FlatBlock::default();
        let mut seen: HashMap<Var, &'static str> = HashMap::new();
        let mut register = |v: Var, kind: &'static str| -> GridResult<()> {
            match seen.insert(v, kind) {
                Some(first) => Err(GridError::DuplicateVariable {
                    name: v.to_string(),
                    first,
                    second: kind,
                }),
                None => Ok(()),
            }
        };
        let mut blocks = Vec::new();
        self.walk(&mut |b| blocks.push(b));
        for b in blocks {
            for v in &b.state_vars {
                register(*v, "state")?;
            }
            for v in &b.algebraic_vars {
                register(*v, "algebraic")?;
            }
            for v in &b.parameters {
                register(*v, "parameter")?;
            }
            flat.state_eqs.extend(b.state_eqs.iter().cloned());
            flat.state_vars.extend_from_slice(&b.state_vars);
            flat.algebraic_eqs.extend(b.algebraic_eqs.iter().cloned());
            flat.algebraic_vars.extend_from_slice(&b.algebraic_vars);
            flat.parameters.extend_from_slice(&b.parameters);
            flat.parameters_eqs.extend(b.parameters_eqs.iter().cloned());
        }
        Ok(flat)
    }
}

fn check_shape(kind: &'static str, equations: usize, variables: usize) -> GridResult<()> {
    if equations != variables {
        return Err(GridError::ShapeMismatch {
            kind,
            equations,
            variables,
        });
    }
    Ok(())
}

/// Incremental constructor for [`Block`].
#[derive(Default)]
pub struct BlockBuilder {
    state_eqs: Vec<Expr>,
    state_vars: Vec<Var>,
    algebraic_eqs: Vec<Expr>,
    algebraic_vars: Vec<Var>,
    parameters: Vec<Var>,
    parameters_eqs: Vec<Expr>,
    driven: Vec<(Var, Option<Expr>)>,
    external_mapping: HashMap<ExternalTag, Var>,
    children: Vec<Block>,
}

impl BlockBuilder {
    /// Adds `d var / dt = eq`.
    pub fn state(mut self, eq: impl Into<Expr>, var: Var) -> Self {
        self.state_eqs.push(eq.into());
        self.state_vars.push(var);
        self
    }

    /// Adds `0 = eq` solved for `var`.
    pub fn algebraic(mut self, eq: impl Into<Expr>, var: Var) -> Self {
        self.algebraic_eqs.push(eq.into());
        self.algebraic_vars.push(var);
        self
    }

    pub fn state_eqs(mut self, eqs: Vec<Expr>) -> Self {
        self.state_eqs = eqs;
        self
    }

    pub fn state_vars(mut self, vars: Vec<Var>) -> Self {
        self.state_vars = vars;
        self
    }

    pub fn algebraic_eqs(mut self, eqs: Vec<Expr>) -> Self {
        self.algebraic_eqs = eqs;
        self
    }

    pub fn algebraic_vars(mut self, vars: Vec<Var>) -> Self {
        self.algebraic_vars = vars;
        self
    }

    /// Adds one parameter, driven by `eq` when given and by events otherwise.
    ///
    /// Parameters added here follow the ones passed through [`Self::parameters`].
    pub fn parameter(mut self, var: Var, eq: Option<Expr>) -> Self {
        self.driven.push((var, eq));
        self
    }

    pub fn parameters(mut self, vars: Vec<Var>) -> Self {
        self.parameters = vars;
        self
    }

    pub fn parameters_eqs(mut self, eqs: Vec<Expr>) -> Self {
        self.parameters_eqs = eqs;
        self
    }

    pub fn external(mut self, tag: ExternalTag, var: Var) -> Self {
        self.external_mapping.insert(tag, var);
        self
    }

    pub fn child(mut self, block: Block) -> Self {
        self.children.push(block);
        self
    }

    pub fn children(mut self, blocks: impl IntoIterator<Item = Block>) -> Self {
        self.children.extend(blocks);
        self
    }

    pub fn build(self) -> GridResult<Block> {
        let mut block = Block::new(
            self.state_eqs,
            self.state_vars,
            self.algebraic_eqs,
            self.algebraic_vars,
            self.parameters,
            self.parameters_eqs,
            self.external_mapping,
            self.children,
        )?;
        for (var, eq) in self.driven {
            block.parameters.push(var);
            block.parameters_eqs.push(eq);
        }
        Ok(block)
    }
}
