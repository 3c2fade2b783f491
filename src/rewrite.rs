use std::collections::HashMap;
use std::env;

use crate::functions::FunctionTable;
use crate::types::{BinaryOp, Expr, ExprKind, Literal, LogicalOp};

pub(crate) use crate::types::ExprError;

/// Which snapshot identifier a back-reference expands from: `data` inside
/// `.read` expressions, `newData` inside `.value` and `.write` expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SnapshotBase {
    Data,
    NewData,
}

impl SnapshotBase {
    fn name(self) -> &'static str {
        match self {
            SnapshotBase::Data => "data",
            SnapshotBase::NewData => "newData",
        }
    }
}

/// Where a node sits relative to its parent. Drives the identifier rules
/// (property names are not references) and the `.val()` coercion rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ctx {
    Root,
    MemberObject { computed: bool },
    MemberProperty { computed: bool },
    Callee,
    Argument,
    Operand,
}

const MAX_PASSES: usize = 64;

/// One fixed-point rewrite of a single expression: normalizes identifiers,
/// expands refs and `env`, lifts member access on snapshots into `.child()`
/// chains, coerces snapshots escaping into value contexts with `.val()`,
/// expands `oneOf`, and inlines function calls.
pub(crate) struct Rewriter<'a> {
    functions: &'a FunctionTable,
    locals: &'a [String],
    refs: &'a HashMap<String, usize>,
    base: SnapshotBase,
    level: usize,
    changed: bool,
}

impl<'a> Rewriter<'a> {
    pub(crate) fn new(
        functions: &'a FunctionTable,
        locals: &'a [String],
        refs: &'a HashMap<String, usize>,
        base: SnapshotBase,
        level: usize,
    ) -> Self {
        Self {
            functions,
            locals,
            refs,
            base,
            level,
            changed: false,
        }
    }

    /// Drive the expression to a fixed point. Each pass is one pre-order +
    /// post-order traversal; a pass that rewrites anything schedules another.
    pub(crate) fn rewrite(mut self, mut expr: Expr) -> Result<Expr, ExprError> {
        for _ in 0..MAX_PASSES {
            self.changed = false;
            expr = self.pass(expr, Ctx::Root)?;
            if !self.changed {
                return Ok(expr);
            }
        }
        Err(ExprError::Runaway(MAX_PASSES))
    }

    fn pass(&mut self, expr: Expr, ctx: Ctx) -> Result<Expr, ExprError> {
        let expr = self.enter(expr, ctx)?;
        let expr = self.descend(expr)?;
        self.leave(expr, ctx)
    }

    // -- Pre-order ----------------------------------------------------------

    fn enter(&mut self, expr: Expr, ctx: Ctx) -> Result<Expr, ExprError> {
        match expr.kind {
            ExprKind::Identifier(name) => self.enter_identifier(name, ctx),
            kind => {
                let mut expr = Expr {
                    kind,
                    snapshot: expr.snapshot,
                };
                if let ExprKind::Call { callee, .. } = &expr.kind
                    && is_snapshot_callee(callee)
                {
                    expr.snapshot = true;
                }
                Ok(expr)
            }
        }
    }

    fn enter_identifier(&mut self, name: String, ctx: Ctx) -> Result<Expr, ExprError> {
        // The property of a dotted access is a name, not a reference.
        if ctx == (Ctx::MemberProperty { computed: false }) {
            return Ok(Expr::identifier(name));
        }
        match name.as_str() {
            "auth" | "now" | "query" | "oneOf" | "env" => Ok(Expr::identifier(name)),
            "root" | "newData" | "data" => Ok(snapshot_identifier(name)),
            "next" => {
                self.changed = true;
                Ok(snapshot_identifier("newData"))
            }
            "prev" => {
                self.changed = true;
                Ok(snapshot_identifier("data"))
            }
            _ => {
                if self.locals.iter().any(|local| *local == name) {
                    return Ok(Expr::identifier(name));
                }
                if let Some(&bound) = self.refs.get(&name) {
                    self.changed = true;
                    return Ok(self.parent_chain(self.level - bound));
                }
                if self.functions.contains(&name) {
                    if ctx != Ctx::Callee && ctx != (Ctx::MemberObject { computed: false }) {
                        // Parameterless call sugar: a bare function name calls it.
                        self.changed = true;
                        return Ok(Expr::call(Expr::identifier(name), vec![]));
                    }
                    return Ok(Expr::identifier(name));
                }
                Err(ExprError::UnknownReference { name })
            }
        }
    }

    /// `<base>.parent().parent()…` with `levels` parent calls.
    fn parent_chain(&self, levels: usize) -> Expr {
        let mut node = snapshot_identifier(self.base.name());
        for _ in 0..levels {
            let mut call = Expr::call(Expr::member(node, "parent"), vec![]);
            call.snapshot = true;
            node = call;
        }
        node
    }

    // -- Recursion ----------------------------------------------------------

    fn descend(&mut self, expr: Expr) -> Result<Expr, ExprError> {
        let Expr { kind, snapshot } = expr;
        let kind = match kind {
            ExprKind::Member {
                object,
                property,
                computed,
            } => {
                let object = Box::new(self.pass(*object, Ctx::MemberObject { computed })?);
                let property = Box::new(self.pass(*property, Ctx::MemberProperty { computed })?);
                ExprKind::Member {
                    object,
                    property,
                    computed,
                }
            }
            ExprKind::Call { callee, args } => {
                let callee = Box::new(self.pass(*callee, Ctx::Callee)?);
                let args = args
                    .into_iter()
                    .map(|arg| self.pass(arg, Ctx::Argument))
                    .collect::<Result<Vec<_>, _>>()?;
                ExprKind::Call { callee, args }
            }
            ExprKind::Unary { op, operand } => ExprKind::Unary {
                op,
                operand: Box::new(self.pass(*operand, Ctx::Operand)?),
            },
            ExprKind::Binary { op, left, right } => ExprKind::Binary {
                op,
                left: Box::new(self.pass(*left, Ctx::Operand)?),
                right: Box::new(self.pass(*right, Ctx::Operand)?),
            },
            ExprKind::Logical { op, left, right } => ExprKind::Logical {
                op,
                left: Box::new(self.pass(*left, Ctx::Operand)?),
                right: Box::new(self.pass(*right, Ctx::Operand)?),
            },
            ExprKind::Conditional {
                test,
                consequent,
                alternate,
            } => ExprKind::Conditional {
                test: Box::new(self.pass(*test, Ctx::Operand)?),
                consequent: Box::new(self.pass(*consequent, Ctx::Operand)?),
                alternate: Box::new(self.pass(*alternate, Ctx::Operand)?),
            },
            ExprKind::Sequence(items) => ExprKind::Sequence(
                items
                    .into_iter()
                    .map(|item| self.pass(item, Ctx::Operand))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            ExprKind::Array(items) => ExprKind::Array(
                items
                    .into_iter()
                    .map(|item| self.pass(item, Ctx::Operand))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            leaf @ (ExprKind::Literal(_) | ExprKind::Identifier(_)) => leaf,
        };
        Ok(Expr { kind, snapshot })
    }

    // -- Post-order ---------------------------------------------------------

    fn leave(&mut self, expr: Expr, ctx: Ctx) -> Result<Expr, ExprError> {
        let expr = self.expand_env(expr)?;
        let expr = self.lift_member(expr, ctx);
        let expr = self.expand_one_of(expr)?;
        let expr = self.inline_call(expr)?;
        Ok(self.coerce_value(expr, ctx))
    }

    /// `env.X` / `env['X']` becomes the environment variable's value as a
    /// string literal, defaulting to the empty string.
    fn expand_env(&mut self, expr: Expr) -> Result<Expr, ExprError> {
        let ExprKind::Member {
            object,
            property,
            computed,
        } = &expr.kind
        else {
            return Ok(expr);
        };
        if !matches!(&object.kind, ExprKind::Identifier(name) if name == "env") {
            return Ok(expr);
        }
        let key = match (&property.kind, computed) {
            (ExprKind::Literal(Literal::String(key)), true) => key.clone(),
            (_, true) => return Err(ExprError::ComputedEnvKey),
            (ExprKind::Identifier(key), false) => key.clone(),
            (_, false) => return Err(ExprError::ComputedEnvKey),
        };
        self.changed = true;
        Ok(Expr::string(env::var(&key).unwrap_or_default()))
    }

    /// Member access on a snapshot becomes a `.child(key)` call, unless the
    /// member is itself the callee of a call (`snap.val()` stays a call).
    fn lift_member(&mut self, expr: Expr, ctx: Ctx) -> Expr {
        match expr {
            Expr {
                kind:
                    ExprKind::Member {
                        object,
                        property,
                        computed,
                    },
                ..
            } if object.snapshot && ctx != Ctx::Callee => {
                let key = if computed {
                    let prop = *property;
                    if self.is_wildcard_local(&prop) {
                        wrap_val(prop)
                    } else {
                        prop
                    }
                } else {
                    match property.kind {
                        ExprKind::Identifier(name) => Expr::string(name),
                        kind => Expr::new(kind),
                    }
                };
                let mut call = Expr::call(
                    Expr {
                        kind: ExprKind::Member {
                            object,
                            property: Box::new(Expr::identifier("child")),
                            computed: false,
                        },
                        snapshot: false,
                    },
                    vec![key],
                );
                call.snapshot = true;
                self.changed = true;
                call
            }
            other => other,
        }
    }

    /// `oneOf(a, b, …)` becomes `newData.val() == a || newData.val() == b || …`.
    fn expand_one_of(&mut self, expr: Expr) -> Result<Expr, ExprError> {
        match expr {
            Expr {
                kind: ExprKind::Call { callee, args },
                snapshot,
            } => {
                if !matches!(&callee.kind, ExprKind::Identifier(name) if name == "oneOf") {
                    return Ok(Expr {
                        kind: ExprKind::Call { callee, args },
                        snapshot,
                    });
                }
                if args.is_empty() {
                    return Err(ExprError::ArgumentCount {
                        name: "oneOf".to_owned(),
                        expected: 1,
                        actual: 0,
                    });
                }
                self.changed = true;
                let mut iter = args.into_iter();
                let first = new_data_equals(iter.next().expect("length checked above"));
                Ok(iter.fold(first, |acc, arg| {
                    Expr::logical(LogicalOp::Or, acc, new_data_equals(arg))
                }))
            }
            other => Ok(other),
        }
    }

    /// A call to a known function whose name is not shadowed by a local is
    /// replaced by the function's (already resolved) body with every
    /// parameter substituted by a deep clone of the matching argument.
    fn inline_call(&mut self, expr: Expr) -> Result<Expr, ExprError> {
        match expr {
            Expr {
                kind: ExprKind::Call { callee, args },
                snapshot,
            } => {
                let rebuild = |callee: Box<Expr>, args: Vec<Expr>| Expr {
                    kind: ExprKind::Call { callee, args },
                    snapshot,
                };
                let ExprKind::Identifier(name) = &callee.kind else {
                    return Ok(rebuild(callee, args));
                };
                if self.locals.iter().any(|local| local == name) {
                    return Ok(rebuild(callee, args));
                }
                let Some(def) = self.functions.get(name) else {
                    return Ok(rebuild(callee, args));
                };
                if def.params.len() != args.len() {
                    return Err(ExprError::ArgumentCount {
                        name: def.name.clone(),
                        expected: def.params.len(),
                        actual: args.len(),
                    });
                }
                self.changed = true;
                let mut body = def.body.clone();
                substitute(&mut body, &def.params, &args);
                Ok(body)
            }
            other => Ok(other),
        }
    }

    /// A snapshot flowing into a value context (anywhere except as the object
    /// of a member access or a call's callee) picks up a trailing `.val()`.
    /// The index of a computed access is a value context.
    fn coerce_value(&mut self, expr: Expr, ctx: Ctx) -> Expr {
        let value_context = matches!(
            ctx,
            Ctx::Root | Ctx::Argument | Ctx::Operand | Ctx::MemberProperty { computed: true }
        );
        if expr.snapshot && value_context {
            self.changed = true;
            wrap_val(expr)
        } else {
            expr
        }
    }

    fn is_wildcard_local(&self, expr: &Expr) -> bool {
        matches!(
            &expr.kind,
            ExprKind::Identifier(name)
                if name.starts_with('$') && self.locals.iter().any(|local| local == name)
        )
    }
}

fn snapshot_identifier(name: impl Into<String>) -> Expr {
    let mut expr = Expr::identifier(name);
    expr.snapshot = true;
    expr
}

fn wrap_val(expr: Expr) -> Expr {
    Expr::call(Expr::member(expr, "val"), vec![])
}

fn new_data_equals(arg: Expr) -> Expr {
    Expr::binary(
        BinaryOp::Eq,
        wrap_val(snapshot_identifier("newData")),
        arg,
    )
}

fn is_snapshot_callee(callee: &Expr) -> bool {
    match &callee.kind {
        ExprKind::Identifier(name) => name == "child" || name == "parent",
        ExprKind::Member {
            property,
            computed: false,
            ..
        } => {
            matches!(&property.kind, ExprKind::Identifier(name) if name == "child" || name == "parent")
        }
        _ => false,
    }
}

fn substitute(expr: &mut Expr, params: &[String], args: &[Expr]) {
    if let ExprKind::Identifier(name) = &expr.kind {
        if let Some(i) = params.iter().position(|p| p == name) {
            *expr = args[i].clone();
        }
        return;
    }
    match &mut expr.kind {
        ExprKind::Member {
            object,
            property,
            computed,
        } => {
            substitute(object, params, args);
            // A dotted property is a name, not a parameter reference.
            if *computed {
                substitute(property, params, args);
            }
        }
        ExprKind::Call { callee, args: call_args } => {
            substitute(callee, params, args);
            for arg in call_args {
                substitute(arg, params, args);
            }
        }
        ExprKind::Unary { operand, .. } => substitute(operand, params, args),
        ExprKind::Binary { left, right, .. } | ExprKind::Logical { left, right, .. } => {
            substitute(left, params, args);
            substitute(right, params, args);
        }
        ExprKind::Conditional {
            test,
            consequent,
            alternate,
        } => {
            substitute(test, params, args);
            substitute(consequent, params, args);
            substitute(alternate, params, args);
        }
        ExprKind::Sequence(items) | ExprKind::Array(items) => {
            for item in items {
                substitute(item, params, args);
            }
        }
        ExprKind::Literal(_) | ExprKind::Identifier(_) => {}
    }
}
