use std::cell::{Ref, RefCell, RefMut};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::rc::Rc;

use thiserror::Error;

use crate::statement::{ControlFlow, Statement};

/// Name-resolution frame: the global environment of a program and the local
/// frame of every method call are both plain closures.
pub type Closure = HashMap<String, ObjectHolder>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("Unknown variable '{name}'")]
    UnknownVariable { name: String },
    #[error("Method '{method}' accepting {argument_count} argument(s) not found")]
    MethodNotFound {
        method: String,
        argument_count: usize,
    },
    #[error("Expected a class instance, got {type_name}")]
    NotAnInstance { type_name: String },
    #[error("Field assignment on non-instance of type {type_name}")]
    FieldAssignmentOnNonInstance { type_name: String },
    #[error("Operation '{operation}' is not supported for type {type_name}")]
    UnsupportedOperation {
        operation: String,
        type_name: String,
    },
    #[error("Cannot compare values of types {lhs} and {rhs}")]
    IncomparableTypes { lhs: String, rhs: String },
    #[error("Division by zero")]
    DivisionByZero,
    #[error("Return outside of a method body")]
    ReturnOutsideMethod,
    #[error("Failed to write program output: {message}")]
    Output { message: String },
}

/// Host environment visible to the evaluator.
pub trait Context {
    fn output_stream(&mut self) -> &mut dyn io::Write;
}

/// Production context writing program output to an arbitrary sink.
pub struct SimpleContext<W: io::Write> {
    output: W,
}

impl<W: io::Write> SimpleContext<W> {
    pub fn new(output: W) -> Self {
        Self { output }
    }

    pub fn into_inner(self) -> W {
        self.output
    }
}

impl<W: io::Write> Context for SimpleContext<W> {
    fn output_stream(&mut self) -> &mut dyn io::Write {
        &mut self.output
    }
}

/// A named method owned by its defining class.
#[derive(Debug)]
pub struct Method {
    pub name: String,
    /// Formal parameters, excluding the receiver.
    pub formal_params: Vec<String>,
    pub body: Statement,
}

/// A class is immutable once defined. Instances refer to it through `Rc`,
/// which also keeps every parent class alive while child instances exist.
pub struct Class {
    name: String,
    methods: Vec<Method>,
    parent: Option<Rc<Class>>,
}

impl Class {
    pub fn new(name: String, methods: Vec<Method>, parent: Option<Rc<Class>>) -> Self {
        Self {
            name,
            methods,
            parent,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// First match in declaration order, then the parent chain.
    pub fn get_method(&self, name: &str) -> Option<&Method> {
        match self.methods.iter().find(|method| method.name == name) {
            Some(method) => Some(method),
            None => self.parent.as_deref().and_then(|parent| parent.get_method(name)),
        }
    }

    pub fn has_method(&self, name: &str, argument_count: usize) -> bool {
        self.get_method(name)
            .is_some_and(|method| method.formal_params.len() == argument_count)
    }
}

// Methods may instantiate their own class, so the method list can reach this
// class again; printing stops at the name.
impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Class")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// An instance carries its class and a mutable per-instance field map.
#[derive(Debug)]
pub struct ClassInstance {
    class: Rc<Class>,
    fields: Closure,
}

impl ClassInstance {
    pub fn new(class: Rc<Class>) -> Self {
        Self {
            class,
            fields: Closure::new(),
        }
    }

    pub fn class(&self) -> &Rc<Class> {
        &self.class
    }

    pub fn fields(&self) -> &Closure {
        &self.fields
    }

    pub fn fields_mut(&mut self) -> &mut Closure {
        &mut self.fields
    }

    pub fn has_method(&self, method: &str, argument_count: usize) -> bool {
        self.class.has_method(method, argument_count)
    }
}

/// Tagged runtime value.
#[derive(Debug)]
pub enum Object {
    Number(i64),
    String(String),
    Bool(bool),
    Class(Rc<Class>),
    Instance(ClassInstance),
}

impl Object {
    pub fn type_name(&self) -> &'static str {
        match self {
            Object::Number(_) => "number",
            Object::String(_) => "string",
            Object::Bool(_) => "bool",
            Object::Class(_) => "class",
            Object::Instance(_) => "class instance",
        }
    }
}

/// Ownership handle for every evaluator-visible value.
///
/// The empty holder is the `None` value. `own` allocates a fresh object;
/// cloning shares ownership of the same object, which also covers binding a
/// method receiver to `self`. Reference cycles through instance fields are
/// never reclaimed.
#[derive(Clone, Default)]
pub struct ObjectHolder {
    data: Option<Rc<RefCell<Object>>>,
}

impl ObjectHolder {
    pub fn own(object: Object) -> Self {
        Self {
            data: Some(Rc::new(RefCell::new(object))),
        }
    }

    pub fn none() -> Self {
        Self { data: None }
    }

    pub fn is_none(&self) -> bool {
        self.data.is_none()
    }

    pub fn get(&self) -> Option<Ref<'_, Object>> {
        self.data.as_ref().map(|data| data.borrow())
    }

    pub fn get_mut(&self) -> Option<RefMut<'_, Object>> {
        self.data.as_ref().map(|data| data.borrow_mut())
    }

    pub fn type_name(&self) -> &'static str {
        match self.get() {
            Some(object) => object.type_name(),
            None => "None",
        }
    }

    pub fn as_number(&self) -> Option<i64> {
        match self.get().as_deref() {
            Some(Object::Number(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.get().as_deref() {
            Some(Object::Bool(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<String> {
        match self.get().as_deref() {
            Some(Object::String(value)) => Some(value.clone()),
            _ => None,
        }
    }

    pub fn is_class_instance(&self) -> bool {
        matches!(self.get().as_deref(), Some(Object::Instance(_)))
    }

    pub fn has_method(&self, method: &str, argument_count: usize) -> bool {
        matches!(
            self.get().as_deref(),
            Some(Object::Instance(instance)) if instance.has_method(method, argument_count)
        )
    }

    /// Calls `method` on this value, which must be a class instance.
    ///
    /// Builds a fresh closure binding `self` and the formal parameters in
    /// order, then executes the method body. A `return` travelling out of the
    /// body becomes the call result; normal completion yields `None`.
    pub fn call_method(
        &self,
        method: &str,
        actual_args: &[ObjectHolder],
        context: &mut dyn Context,
    ) -> Result<ObjectHolder, RuntimeError> {
        let class = {
            let Some(object) = self.get() else {
                return Err(RuntimeError::NotAnInstance {
                    type_name: "None".to_string(),
                });
            };
            match &*object {
                Object::Instance(instance) => {
                    if !instance.has_method(method, actual_args.len()) {
                        return Err(RuntimeError::MethodNotFound {
                            method: method.to_string(),
                            argument_count: actual_args.len(),
                        });
                    }
                    Rc::clone(instance.class())
                }
                other => {
                    return Err(RuntimeError::NotAnInstance {
                        type_name: other.type_name().to_string(),
                    });
                }
            }
        };

        let Some(resolved) = class.get_method(method) else {
            return Err(RuntimeError::MethodNotFound {
                method: method.to_string(),
                argument_count: actual_args.len(),
            });
        };
        let mut call_closure = Closure::new();
        call_closure.insert("self".to_string(), self.clone());
        for (param, arg) in resolved.formal_params.iter().zip(actual_args) {
            call_closure.insert(param.clone(), arg.clone());
        }
        match resolved.body.execute(&mut call_closure, context) {
            Ok(value) => Ok(value),
            Err(ControlFlow::Return(value)) => Ok(value),
            Err(ControlFlow::Error(error)) => Err(error),
        }
    }

    /// Renders the printable form of this value.
    ///
    /// Instances defer to a zero-argument `__str__` when their class defines
    /// one, and fall back to pointer identity otherwise.
    pub fn to_output(&self, context: &mut dyn Context) -> Result<String, RuntimeError> {
        let Some(data) = &self.data else {
            return Ok("None".to_string());
        };
        let use_str_method = {
            let object = data.borrow();
            match &*object {
                Object::Number(value) => return Ok(value.to_string()),
                Object::String(value) => return Ok(value.clone()),
                Object::Bool(value) => {
                    return Ok(if *value { "True" } else { "False" }.to_string());
                }
                Object::Class(class) => return Ok(format!("Class {}", class.name())),
                Object::Instance(instance) => instance.has_method("__str__", 0),
            }
        };
        if use_str_method {
            let rendered = self.call_method("__str__", &[], context)?;
            rendered.to_output(context)
        } else {
            Ok(format!("{:p}", Rc::as_ptr(data)))
        }
    }
}

impl fmt::Debug for ObjectHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectHolder({})", self.type_name())
    }
}

/// Truthiness of any evaluator value.
pub fn is_true(object: &ObjectHolder) -> bool {
    match object.get().as_deref() {
        Some(Object::Bool(value)) => *value,
        Some(Object::Number(value)) => *value != 0,
        Some(Object::String(value)) => !value.is_empty(),
        _ => false,
    }
}

/// Equality per the language protocol: two `None` values are equal, instances
/// dispatch to a one-argument `__eq__`, scalars compare by kind.
pub fn equal(
    lhs: &ObjectHolder,
    rhs: &ObjectHolder,
    context: &mut dyn Context,
) -> Result<bool, RuntimeError> {
    if lhs.is_none() && rhs.is_none() {
        return Ok(true);
    }
    if lhs.is_class_instance() {
        return dunder_comparison(lhs, rhs, "__eq__", context);
    }
    compare_values(lhs, rhs, Ordering::is_eq)
}

/// Strict ordering: instances dispatch to `__lt__`, scalars compare by kind.
pub fn less(
    lhs: &ObjectHolder,
    rhs: &ObjectHolder,
    context: &mut dyn Context,
) -> Result<bool, RuntimeError> {
    if lhs.is_class_instance() {
        return dunder_comparison(lhs, rhs, "__lt__", context);
    }
    compare_values(lhs, rhs, Ordering::is_lt)
}

pub fn not_equal(
    lhs: &ObjectHolder,
    rhs: &ObjectHolder,
    context: &mut dyn Context,
) -> Result<bool, RuntimeError> {
    Ok(!equal(lhs, rhs, context)?)
}

pub fn greater(
    lhs: &ObjectHolder,
    rhs: &ObjectHolder,
    context: &mut dyn Context,
) -> Result<bool, RuntimeError> {
    Ok(!less(lhs, rhs, context)? && !equal(lhs, rhs, context)?)
}

pub fn less_or_equal(
    lhs: &ObjectHolder,
    rhs: &ObjectHolder,
    context: &mut dyn Context,
) -> Result<bool, RuntimeError> {
    Ok(less(lhs, rhs, context)? || equal(lhs, rhs, context)?)
}

pub fn greater_or_equal(
    lhs: &ObjectHolder,
    rhs: &ObjectHolder,
    context: &mut dyn Context,
) -> Result<bool, RuntimeError> {
    Ok(!less(lhs, rhs, context)?)
}

fn dunder_comparison(
    lhs: &ObjectHolder,
    rhs: &ObjectHolder,
    method: &str,
    context: &mut dyn Context,
) -> Result<bool, RuntimeError> {
    if !lhs.has_method(method, 1) {
        return Err(RuntimeError::UnsupportedOperation {
            operation: method.to_string(),
            type_name: lhs.type_name().to_string(),
        });
    }
    let result = lhs.call_method(method, std::slice::from_ref(rhs), context)?;
    result
        .as_bool()
        .ok_or_else(|| RuntimeError::UnsupportedOperation {
            operation: method.to_string(),
            type_name: result.type_name().to_string(),
        })
}

/// Host comparison of two scalars of the same kind.
fn compare_values(
    lhs: &ObjectHolder,
    rhs: &ObjectHolder,
    comp: fn(Ordering) -> bool,
) -> Result<bool, RuntimeError> {
    let type_mismatch = || RuntimeError::IncomparableTypes {
        lhs: lhs.type_name().to_string(),
        rhs: rhs.type_name().to_string(),
    };
    let (Some(left), Some(right)) = (lhs.get(), rhs.get()) else {
        return Err(type_mismatch());
    };
    match (&*left, &*right) {
        (Object::Bool(a), Object::Bool(b)) => Ok(comp(a.cmp(b))),
        (Object::Number(a), Object::Number(b)) => Ok(comp(a.cmp(b))),
        (Object::String(a), Object::String(b)) => Ok(comp(a.cmp(b))),
        _ => Err(type_mismatch()),
    }
}
