use std::rc::Rc;

use crate::runtime::{
    self, Class, ClassInstance, Closure, Context, Object, ObjectHolder, RuntimeError,
};

/// Signal threaded through execution as the error channel: either a genuine
/// runtime failure, or a `return` travelling to the enclosing method body.
#[derive(Debug)]
pub enum ControlFlow {
    Return(ObjectHolder),
    Error(RuntimeError),
}

impl From<RuntimeError> for ControlFlow {
    fn from(error: RuntimeError) -> Self {
        ControlFlow::Error(error)
    }
}

pub type ExecResult = Result<ObjectHolder, ControlFlow>;

/// Comparator applied by `Comparison` nodes; see `runtime::equal` and friends.
pub type Comparator =
    fn(&ObjectHolder, &ObjectHolder, &mut dyn Context) -> Result<bool, RuntimeError>;

/// Executable AST node. Statements and expressions share one representation;
/// every node yields an `ObjectHolder` when executed.
#[derive(Debug)]
pub enum Statement {
    /// Literal value; yields a shared handle to the same object on every run.
    Constant { value: ObjectHolder },
    Assignment { var: String, rv: Box<Statement> },
    /// Variable lookup, possibly reaching through instance fields (`a.b.c`).
    VariableValue { dotted_ids: Vec<String> },
    FieldAssignment {
        object: Box<Statement>,
        field_name: String,
        rv: Box<Statement>,
    },
    Print { args: Vec<Statement> },
    MethodCall {
        object: Box<Statement>,
        method: String,
        args: Vec<Statement>,
    },
    NewInstance {
        class: Rc<Class>,
        args: Vec<Statement>,
    },
    Return { statement: Box<Statement> },
    Compound { statements: Vec<Statement> },
    IfElse {
        condition: Box<Statement>,
        if_body: Box<Statement>,
        else_body: Option<Box<Statement>>,
    },
    Or { lhs: Box<Statement>, rhs: Box<Statement> },
    And { lhs: Box<Statement>, rhs: Box<Statement> },
    Not { argument: Box<Statement> },
    Comparison {
        comparator: Comparator,
        lhs: Box<Statement>,
        rhs: Box<Statement>,
    },
    Add { lhs: Box<Statement>, rhs: Box<Statement> },
    Sub { lhs: Box<Statement>, rhs: Box<Statement> },
    Mult { lhs: Box<Statement>, rhs: Box<Statement> },
    Div { lhs: Box<Statement>, rhs: Box<Statement> },
    Stringify { argument: Box<Statement> },
    ClassDefinition { class: Rc<Class> },
    /// Frame boundary of a method call; the only node that catches `Return`.
    MethodBody { body: Box<Statement> },
}

impl Statement {
    pub fn execute(&self, closure: &mut Closure, context: &mut dyn Context) -> ExecResult {
        match self {
            Statement::Constant { value } => Ok(value.clone()),
            Statement::Assignment { var, rv } => {
                let value = rv.execute(closure, context)?;
                closure.insert(var.clone(), value.clone());
                Ok(value)
            }
            Statement::VariableValue { dotted_ids } => {
                let Some((first, rest)) = dotted_ids.split_first() else {
                    return Err(RuntimeError::UnknownVariable {
                        name: String::new(),
                    }
                    .into());
                };
                let mut value =
                    closure
                        .get(first)
                        .cloned()
                        .ok_or_else(|| RuntimeError::UnknownVariable {
                            name: first.clone(),
                        })?;
                for id in rest {
                    value = instance_field(&value, id)?;
                }
                Ok(value)
            }
            Statement::FieldAssignment {
                object,
                field_name,
                rv,
            } => {
                let target = object.execute(closure, context)?;
                let value = rv.execute(closure, context)?;
                let Some(mut target_object) = target.get_mut() else {
                    return Err(RuntimeError::FieldAssignmentOnNonInstance {
                        type_name: "None".to_string(),
                    }
                    .into());
                };
                match &mut *target_object {
                    Object::Instance(instance) => {
                        instance
                            .fields_mut()
                            .insert(field_name.clone(), value.clone());
                    }
                    other => {
                        return Err(RuntimeError::FieldAssignmentOnNonInstance {
                            type_name: other.type_name().to_string(),
                        }
                        .into());
                    }
                }
                Ok(value)
            }
            Statement::Print { args } => {
                for (index, arg) in args.iter().enumerate() {
                    let value = arg.execute(closure, context)?;
                    let rendered = value.to_output(context)?;
                    if index > 0 {
                        write_output(context, " ")?;
                    }
                    write_output(context, &rendered)?;
                }
                write_output(context, "\n")?;
                Ok(ObjectHolder::none())
            }
            Statement::MethodCall {
                object,
                method,
                args,
            } => {
                let receiver = object.execute(closure, context)?;
                if !receiver.is_class_instance() {
                    return Err(RuntimeError::NotAnInstance {
                        type_name: receiver.type_name().to_string(),
                    }
                    .into());
                }
                let mut actual_args = Vec::with_capacity(args.len());
                for arg in args {
                    actual_args.push(arg.execute(closure, context)?);
                }
                Ok(receiver.call_method(method, &actual_args, context)?)
            }
            Statement::NewInstance { class, args } => {
                let instance =
                    ObjectHolder::own(Object::Instance(ClassInstance::new(Rc::clone(class))));
                if class.has_method("__init__", args.len()) {
                    let mut actual_args = Vec::with_capacity(args.len());
                    for arg in args {
                        actual_args.push(arg.execute(closure, context)?);
                    }
                    instance.call_method("__init__", &actual_args, context)?;
                }
                Ok(instance)
            }
            Statement::Return { statement } => {
                let value = statement.execute(closure, context)?;
                Err(ControlFlow::Return(value))
            }
            Statement::Compound { statements } => {
                for statement in statements {
                    statement.execute(closure, context)?;
                }
                Ok(ObjectHolder::none())
            }
            Statement::IfElse {
                condition,
                if_body,
                else_body,
            } => {
                let condition = condition.execute(closure, context)?;
                if runtime::is_true(&condition) {
                    if_body.execute(closure, context)
                } else if let Some(else_body) = else_body {
                    else_body.execute(closure, context)
                } else {
                    Ok(ObjectHolder::none())
                }
            }
            Statement::Or { lhs, rhs } => {
                let left = lhs.execute(closure, context)?;
                if runtime::is_true(&left) {
                    return Ok(ObjectHolder::own(Object::Bool(true)));
                }
                let right = rhs.execute(closure, context)?;
                Ok(ObjectHolder::own(Object::Bool(runtime::is_true(&right))))
            }
            Statement::And { lhs, rhs } => {
                let left = lhs.execute(closure, context)?;
                if !runtime::is_true(&left) {
                    return Ok(ObjectHolder::own(Object::Bool(false)));
                }
                let right = rhs.execute(closure, context)?;
                Ok(ObjectHolder::own(Object::Bool(runtime::is_true(&right))))
            }
            Statement::Not { argument } => {
                let value = argument.execute(closure, context)?;
                Ok(ObjectHolder::own(Object::Bool(!runtime::is_true(&value))))
            }
            Statement::Comparison {
                comparator,
                lhs,
                rhs,
            } => {
                let left = lhs.execute(closure, context)?;
                let right = rhs.execute(closure, context)?;
                let result = comparator(&left, &right, context)?;
                Ok(ObjectHolder::own(Object::Bool(result)))
            }
            Statement::Add { lhs, rhs } => {
                let left = lhs.execute(closure, context)?;
                let right = rhs.execute(closure, context)?;
                if let (Some(a), Some(b)) = (left.as_number(), right.as_number()) {
                    return Ok(ObjectHolder::own(Object::Number(a + b)));
                }
                if let (Some(a), Some(b)) = (left.as_string(), right.as_string()) {
                    return Ok(ObjectHolder::own(Object::String(a + &b)));
                }
                if left.is_class_instance() {
                    return Ok(left.call_method("__add__", &[right], context)?);
                }
                Err(RuntimeError::UnsupportedOperation {
                    operation: "__add__".to_string(),
                    type_name: left.type_name().to_string(),
                }
                .into())
            }
            Statement::Sub { lhs, rhs } => {
                let left = lhs.execute(closure, context)?;
                let right = rhs.execute(closure, context)?;
                let (a, b) = numeric_operands("sub", &left, &right)?;
                Ok(ObjectHolder::own(Object::Number(a - b)))
            }
            Statement::Mult { lhs, rhs } => {
                let left = lhs.execute(closure, context)?;
                let right = rhs.execute(closure, context)?;
                let (a, b) = numeric_operands("mult", &left, &right)?;
                Ok(ObjectHolder::own(Object::Number(a * b)))
            }
            Statement::Div { lhs, rhs } => {
                let left = lhs.execute(closure, context)?;
                let right = rhs.execute(closure, context)?;
                let (a, b) = numeric_operands("div", &left, &right)?;
                if b == 0 {
                    return Err(RuntimeError::DivisionByZero.into());
                }
                Ok(ObjectHolder::own(Object::Number(a / b)))
            }
            Statement::Stringify { argument } => {
                let value = argument.execute(closure, context)?;
                let rendered = value.to_output(context)?;
                Ok(ObjectHolder::own(Object::String(rendered)))
            }
            Statement::ClassDefinition { class } => {
                closure.insert(
                    class.name().to_string(),
                    ObjectHolder::own(Object::Class(Rc::clone(class))),
                );
                Ok(ObjectHolder::none())
            }
            Statement::MethodBody { body } => match body.execute(closure, context) {
                Ok(_) => Ok(ObjectHolder::none()),
                Err(ControlFlow::Return(value)) => Ok(value),
                Err(error) => Err(error),
            },
        }
    }
}

/// Runs a program's top-level statement in `closure`. A `return` escaping the
/// top level is a runtime failure.
pub fn execute_program(
    program: &Statement,
    closure: &mut Closure,
    context: &mut dyn Context,
) -> Result<(), RuntimeError> {
    match program.execute(closure, context) {
        Ok(_) => Ok(()),
        Err(ControlFlow::Error(error)) => Err(error),
        Err(ControlFlow::Return(_)) => Err(RuntimeError::ReturnOutsideMethod),
    }
}

fn instance_field(value: &ObjectHolder, field: &str) -> Result<ObjectHolder, ControlFlow> {
    let Some(object) = value.get() else {
        return Err(RuntimeError::NotAnInstance {
            type_name: "None".to_string(),
        }
        .into());
    };
    match &*object {
        Object::Instance(instance) => instance
            .fields()
            .get(field)
            .cloned()
            .ok_or_else(|| {
                RuntimeError::UnknownVariable {
                    name: field.to_string(),
                }
                .into()
            }),
        other => Err(RuntimeError::NotAnInstance {
            type_name: other.type_name().to_string(),
        }
        .into()),
    }
}

fn numeric_operands(
    operation: &str,
    lhs: &ObjectHolder,
    rhs: &ObjectHolder,
) -> Result<(i64, i64), RuntimeError> {
    match (lhs.as_number(), rhs.as_number()) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(RuntimeError::UnsupportedOperation {
            operation: operation.to_string(),
            type_name: lhs.type_name().to_string(),
        }),
    }
}

fn write_output(context: &mut dyn Context, text: &str) -> Result<(), RuntimeError> {
    context
        .output_stream()
        .write_all(text.as_bytes())
        .map_err(|error| RuntimeError::Output {
            message: error.to_string(),
        })
}
