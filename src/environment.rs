use crate::runtime::Value;
use std::{cell::RefCell, collections::HashMap, rc::Rc};

/// A scope's name-to-value map plus a lookup link to its enclosing scope.
///
/// Scopes are shared: every closure holds a counted reference to the
/// environment it was defined in, so the chain forms a DAG rooted at the
/// globals. Parent links only ever point outward, which keeps the graph
/// acyclic.
#[derive(Debug, Default)]
pub struct Environment {
    values: RefCell<HashMap<String, Binding>>,
    parent: Option<Scope>,
}

pub type Scope = Rc<Environment>;

#[derive(Debug, Clone)]
struct Binding {
    value: Value,
    constant: bool,
}

/// Why an assignment through the scope chain was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignError {
    Undefined,
    Constant,
}

impl Environment {
    pub fn root() -> Scope {
        Rc::new(Environment::default())
    }

    pub fn nested(parent: &Scope) -> Scope {
        Rc::new(Environment {
            values: RefCell::new(HashMap::new()),
            parent: Some(Rc::clone(parent)),
        })
    }

    /// Declares `name` in this scope, shadowing any outer binding.
    pub fn define(&self, name: impl Into<String>, value: Value, constant: bool) {
        self.values
            .borrow_mut()
            .insert(name.into(), Binding { value, constant });
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        if let Some(binding) = self.values.borrow().get(name) {
            return Some(binding.value.clone());
        }
        self.parent.as_ref().and_then(|parent| parent.get(name))
    }

    /// Assigns to the nearest enclosing binding of `name`.
    pub fn assign(&self, name: &str, value: Value) -> Result<(), AssignError> {
        let mut values = self.values.borrow_mut();
        if let Some(binding) = values.get_mut(name) {
            if binding.constant {
                return Err(AssignError::Constant);
            }
            binding.value = value;
            return Ok(());
        }
        drop(values);

        match &self.parent {
            Some(parent) => parent.assign(name, value),
            None => Err(AssignError::Undefined),
        }
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.values.borrow().contains_key(name)
            || self
                .parent
                .as_ref()
                .is_some_and(|parent| parent.is_defined(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_define_and_get() {
        let env = Environment::root();
        env.define("x", Value::Number(1.0), false);
        assert_eq!(env.get("x"), Some(Value::Number(1.0)));
        assert_eq!(env.get("y"), None);
    }

    #[test]
    fn test_lookup_walks_parents() {
        let root = Environment::root();
        root.define("x", Value::Number(1.0), false);
        let inner = Environment::nested(&root);
        assert_eq!(inner.get("x"), Some(Value::Number(1.0)));
    }

    #[test]
    fn test_shadowing_does_not_leak_outward() {
        let root = Environment::root();
        root.define("x", Value::Number(1.0), false);
        let inner = Environment::nested(&root);
        inner.define("x", Value::Number(2.0), false);

        assert_eq!(inner.get("x"), Some(Value::Number(2.0)));
        assert_eq!(root.get("x"), Some(Value::Number(1.0)));
    }

    #[test]
    fn test_assign_updates_nearest_binding() {
        let root = Environment::root();
        root.define("x", Value::Number(1.0), false);
        let inner = Environment::nested(&root);

        // No local binding, so the assignment lands on the root.
        assert!(inner.assign("x", Value::Number(5.0)).is_ok());
        assert_eq!(root.get("x"), Some(Value::Number(5.0)));

        assert_eq!(
            inner.assign("missing", Value::Null),
            Err(AssignError::Undefined)
        );
    }

    #[test]
    fn test_const_bindings_refuse_assignment() {
        let env = Environment::root();
        env.define("limit", Value::Number(10.0), true);
        assert_eq!(
            env.assign("limit", Value::Number(20.0)),
            Err(AssignError::Constant)
        );
        assert_eq!(env.get("limit"), Some(Value::Number(10.0)));
    }

    #[test]
    fn test_shared_scope_sees_mutations() {
        // Two nested scopes sharing one parent observe the same binding,
        // which is what gives closures their reference semantics.
        let root = Environment::root();
        root.define("counter", Value::Number(0.0), false);
        let a = Environment::nested(&root);
        let b = Environment::nested(&root);

        a.assign("counter", Value::Number(1.0)).unwrap();
        assert_eq!(b.get("counter"), Some(Value::Number(1.0)));
    }
}
