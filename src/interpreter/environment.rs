use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use super::error::RuntimeError;
use super::value::Value;

#[derive(Debug, Clone)]
struct Binding {
    value: Value,
    mutable: bool,
}

#[derive(Debug, Default)]
struct Scope {
    values: FxHashMap<String, Binding>,
    /// Declaration order, so snapshots list variables deterministically.
    order: Vec<String>,
    /// Receiver bound by a non-arrow function call.
    this: Option<Value>,
    /// Function bodies and the global scope collect `var` declarations.
    hoists_var: bool,
    parent: Option<Environment>,
}

/// Lexical scope chain. Cloning shares the underlying scope.
#[derive(Debug, Clone)]
pub(crate) struct Environment {
    inner: Rc<RefCell<Scope>>,
}

impl Environment {
    /// Root scope with no parent.
    pub(crate) fn new() -> Self {
        Self::with_scope(Scope {
            hoists_var: true,
            ..Scope::default()
        })
    }

    /// Block scope nested inside `parent`.
    pub(crate) fn new_enclosed(parent: &Environment) -> Self {
        Self::with_scope(Scope {
            parent: Some(parent.clone()),
            ..Scope::default()
        })
    }

    /// Program scope; `intrinsics` holds the built-in globals.
    pub(crate) fn new_global(intrinsics: &Environment) -> Self {
        Self::with_scope(Scope {
            hoists_var: true,
            parent: Some(intrinsics.clone()),
            ..Scope::default()
        })
    }

    /// Scope for one function invocation.
    pub(crate) fn new_function_scope(parent: &Environment, this: Option<Value>) -> Self {
        Self::with_scope(Scope {
            this,
            hoists_var: true,
            parent: Some(parent.clone()),
            ..Scope::default()
        })
    }

    fn with_scope(scope: Scope) -> Self {
        Self {
            inner: Rc::new(RefCell::new(scope)),
        }
    }

    pub(crate) fn parent(&self) -> Option<Environment> {
        self.inner.borrow().parent.clone()
    }

    pub(crate) fn ptr_eq(&self, other: &Environment) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Creates (or shadows) a mutable binding in this scope.
    pub(crate) fn define(&self, name: &str, value: Value) {
        self.insert(name, value, true);
    }

    pub(crate) fn define_constant(&self, name: &str, value: Value) {
        self.insert(name, value, false);
    }

    /// `var` semantics: binds in the nearest function or global scope.
    pub(crate) fn define_var(&self, name: &str, value: Value) {
        let mut current = self.clone();
        loop {
            if current.inner.borrow().hoists_var {
                current.define(name, value);
                return;
            }
            let Some(parent) = current.parent() else {
                current.define(name, value);
                return;
            };
            current = parent;
        }
    }

    /// Sibling scope holding copies of this scope's bindings. Gives each
    /// `for (let ...)` iteration its own binding for closures to capture.
    pub(crate) fn fork(&self) -> Environment {
        let scope = self.inner.borrow();
        Self::with_scope(Scope {
            values: scope.values.clone(),
            order: scope.order.clone(),
            this: scope.this.clone(),
            hoists_var: scope.hoists_var,
            parent: scope.parent.clone(),
        })
    }

    pub(crate) fn has_own(&self, name: &str) -> bool {
        self.inner.borrow().values.contains_key(name)
    }

    fn insert(&self, name: &str, value: Value, mutable: bool) {
        let mut scope = self.inner.borrow_mut();
        if !scope.values.contains_key(name) {
            scope.order.push(name.to_string());
        }
        scope
            .values
            .insert(name.to_string(), Binding { value, mutable });
    }

    pub(crate) fn get(&self, name: &str) -> Result<Value, RuntimeError> {
        self.lookup(name)
            .ok_or_else(|| RuntimeError::UndefinedVariable {
                name: name.to_string(),
            })
    }

    pub(crate) fn lookup(&self, name: &str) -> Option<Value> {
        let scope = self.inner.borrow();
        if let Some(binding) = scope.values.get(name) {
            return Some(binding.value.clone());
        }
        scope.parent.as_ref()?.lookup(name)
    }

    /// Updates the nearest binding named `name`.
    pub(crate) fn assign(&self, name: &str, value: Value) -> Result<(), RuntimeError> {
        let mut scope = self.inner.borrow_mut();
        if let Some(binding) = scope.values.get_mut(name) {
            if !binding.mutable {
                return Err(RuntimeError::AssignToConstant {
                    name: name.to_string(),
                });
            }
            binding.value = value;
            return Ok(());
        }
        match scope.parent.as_ref() {
            Some(parent) => parent.assign(name, value),
            None => Err(RuntimeError::AssignToUndeclared {
                name: name.to_string(),
            }),
        }
    }

    /// Receiver of the innermost non-arrow function call.
    pub(crate) fn this_value(&self) -> Value {
        let scope = self.inner.borrow();
        if let Some(this) = &scope.this {
            return this.clone();
        }
        match &scope.parent {
            Some(parent) => parent.this_value(),
            None => Value::Undefined,
        }
    }

    /// Bindings declared directly in this scope, in declaration order.
    pub(crate) fn bindings(&self) -> Vec<(String, Value)> {
        let scope = self.inner.borrow();
        scope
            .order
            .iter()
            .filter_map(|name| {
                scope
                    .values
                    .get(name)
                    .map(|binding| (name.clone(), binding.value.clone()))
            })
            .collect()
    }

    /// Every binding visible from this scope up to and including `boundary`.
    /// Inner bindings shadow outer ones; outermost declarations come first.
    pub(crate) fn visible_bindings(&self, boundary: &Environment) -> Vec<(String, Value)> {
        let mut chain = Vec::new();
        let mut current = Some(self.clone());
        while let Some(scope) = current {
            let reached_boundary = scope.ptr_eq(boundary);
            current = if reached_boundary {
                None
            } else {
                scope.parent()
            };
            chain.push(scope);
        }

        let mut visible: Vec<(String, Value)> = Vec::new();
        for scope in chain.iter().rev() {
            for (name, value) in scope.bindings() {
                if let Some(slot) = visible.iter_mut().find(|(existing, _)| *existing == name) {
                    slot.1 = value;
                } else {
                    visible.push((name, value));
                }
            }
        }
        visible
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn number(value: &Value) -> f64 {
        match value {
            Value::Number(n) => *n,
            other => panic!("expected number, got {other:?}"),
        }
    }

    #[test]
    fn resolves_through_parent_chain() {
        let global = Environment::new();
        global.define("x", Value::Number(1.0));
        let block = Environment::new_enclosed(&global);
        block.define("y", Value::Number(2.0));

        assert_eq!(number(&block.get("x").expect("x visible")), 1.0);
        assert!(global.get("y").is_err());
    }

    #[test]
    fn assignment_updates_nearest_binding() {
        let global = Environment::new();
        global.define("x", Value::Number(1.0));
        let inner = Environment::new_enclosed(&global);
        inner.assign("x", Value::Number(5.0)).expect("x is declared");

        assert_eq!(number(&global.get("x").expect("x visible")), 5.0);
    }

    #[test]
    fn assignment_to_unknown_or_constant_fails() {
        let global = Environment::new();
        global.define_constant("limit", Value::Number(3.0));

        assert!(matches!(
            global.assign("missing", Value::Null),
            Err(RuntimeError::AssignToUndeclared { .. })
        ));
        assert!(matches!(
            global.assign("limit", Value::Null),
            Err(RuntimeError::AssignToConstant { .. })
        ));
    }

    #[test]
    fn var_declarations_escape_blocks() {
        let global = Environment::new();
        let function = Environment::new_function_scope(&global, None);
        let block = Environment::new_enclosed(&function);
        block.define_var("total", Value::Number(0.0));

        assert!(function.lookup("total").is_some());
        assert!(global.lookup("total").is_none());
    }

    #[test]
    fn visible_bindings_stop_at_boundary_and_respect_shadowing() {
        let global = Environment::new();
        global.define("outer", Value::Number(0.0));
        let function = Environment::new_function_scope(&global, None);
        function.define("n", Value::Number(1.0));
        let block = Environment::new_enclosed(&function);
        block.define("n", Value::Number(2.0));
        block.define("i", Value::Number(3.0));

        let visible = block.visible_bindings(&function);
        let names: Vec<&str> = visible.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["n", "i"]);
        assert_eq!(number(&visible[0].1), 2.0);
    }

    #[test]
    fn forked_scopes_do_not_share_bindings() {
        let global = Environment::new();
        let loop_scope = Environment::new_enclosed(&global);
        loop_scope.define("i", Value::Number(0.0));
        let next = loop_scope.fork();
        next.assign("i", Value::Number(1.0)).expect("i is declared");

        assert_eq!(number(&loop_scope.get("i").expect("i visible")), 0.0);
        assert_eq!(number(&next.get("i").expect("i visible")), 1.0);
        assert!(next.parent().is_some_and(|parent| parent.ptr_eq(&global)));
    }

    #[test]
    fn this_is_found_on_enclosing_function_scope() {
        let global = Environment::new();
        let function = Environment::new_function_scope(&global, Some(Value::Boolean(true)));
        let block = Environment::new_enclosed(&function);

        assert!(matches!(block.this_value(), Value::Boolean(true)));
        assert!(matches!(global.this_value(), Value::Undefined));
    }
}
