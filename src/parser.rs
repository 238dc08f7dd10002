use std::collections::HashMap;
use std::rc::Rc;

use thiserror::Error;

use crate::lexer::{LexError, Lexer};
use crate::runtime::{self, Class, Method, Object, ObjectHolder};
use crate::statement::{Comparator, Statement};
use crate::token::Token;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error("Unknown class name '{name}'")]
    UnknownClassName { name: String },
    #[error("Invalid assignment target")]
    InvalidAssignmentTarget,
    #[error("Expected an expression, found {found}")]
    ExpectedExpression { found: String },
    #[error("str() takes exactly one argument, got {found}")]
    StringifyArity { found: usize },
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Parses a whole program into its top-level compound statement.
pub fn parse_program(input: &str) -> ParseResult<Statement> {
    let lexer = Lexer::new(input)?;
    Parser::new(lexer).parse()
}

pub struct Parser<'a> {
    lexer: Lexer<'a>,
    /// Classes defined so far; instantiations are resolved against it.
    classes: HashMap<String, Rc<Class>>,
}

impl<'a> Parser<'a> {
    pub fn new(lexer: Lexer<'a>) -> Self {
        Self {
            lexer,
            classes: HashMap::new(),
        }
    }

    pub fn parse(mut self) -> ParseResult<Statement> {
        let mut statements = Vec::new();
        while self.lexer.current_token() != &Token::Eof {
            if self.lexer.current_token() == &Token::Newline {
                self.lexer.next_token()?;
                continue;
            }
            statements.push(self.parse_statement()?);
        }
        Ok(Statement::Compound { statements })
    }

    fn parse_statement(&mut self) -> ParseResult<Statement> {
        match self.lexer.current_token() {
            Token::Class => self.parse_class_definition(),
            Token::If => self.parse_if_else(),
            Token::Return => self.parse_return(),
            Token::Print => self.parse_print(),
            _ => {
                let statement = self.parse_assignment_or_expression()?;
                self.expect_statement_end()?;
                Ok(statement)
            }
        }
    }

    fn parse_class_definition(&mut self) -> ParseResult<Statement> {
        let name = self.lexer.expect_next_id()?;
        self.lexer.next_token()?;
        let parent = if self.lexer.current_token() == &Token::Char('(') {
            let parent_name = self.lexer.expect_next_id()?;
            let parent = self.lookup_class(&parent_name)?;
            self.lexer.expect_next(&Token::Char(')'))?;
            self.lexer.next_token()?;
            Some(parent)
        } else {
            None
        };
        self.lexer.expect(&Token::Char(':'))?;
        self.lexer.expect_next(&Token::Newline)?;
        self.lexer.expect_next(&Token::Indent)?;
        self.lexer.next_token()?;

        let mut methods = Vec::new();
        while self.lexer.current_token() != &Token::Dedent {
            if self.lexer.current_token() == &Token::Newline {
                self.lexer.next_token()?;
                continue;
            }
            methods.push(self.parse_method()?);
        }
        self.lexer.next_token()?;

        let class = Rc::new(Class::new(name.clone(), methods, parent));
        self.classes.insert(name, Rc::clone(&class));
        Ok(Statement::ClassDefinition { class })
    }

    fn parse_method(&mut self) -> ParseResult<Method> {
        self.lexer.expect(&Token::Def)?;
        let name = self.lexer.expect_next_id()?;
        self.lexer.expect_next(&Token::Char('('))?;
        // The explicit receiver is always declared first; the runtime rebinds
        // it as `self` on every call, so it is not a formal parameter.
        self.lexer.expect_next_id()?;
        self.lexer.next_token()?;
        let mut formal_params = Vec::new();
        while self.lexer.current_token() == &Token::Char(',') {
            formal_params.push(self.lexer.expect_next_id()?);
            self.lexer.next_token()?;
        }
        self.lexer.expect(&Token::Char(')'))?;
        self.lexer.expect_next(&Token::Char(':'))?;
        self.lexer.next_token()?;
        let body = self.parse_suite()?;
        Ok(Method {
            name,
            formal_params,
            body: Statement::MethodBody {
                body: Box::new(body),
            },
        })
    }

    /// Indented statement block: `NEWLINE INDENT statement+ DEDENT`.
    fn parse_suite(&mut self) -> ParseResult<Statement> {
        self.lexer.expect(&Token::Newline)?;
        self.lexer.expect_next(&Token::Indent)?;
        self.lexer.next_token()?;
        let mut statements = Vec::new();
        while self.lexer.current_token() != &Token::Dedent {
            if self.lexer.current_token() == &Token::Newline {
                self.lexer.next_token()?;
                continue;
            }
            statements.push(self.parse_statement()?);
        }
        self.lexer.next_token()?;
        Ok(Statement::Compound { statements })
    }

    fn parse_if_else(&mut self) -> ParseResult<Statement> {
        self.lexer.next_token()?;
        let condition = self.parse_test()?;
        self.lexer.expect(&Token::Char(':'))?;
        self.lexer.next_token()?;
        let if_body = self.parse_suite()?;
        let else_body = if self.lexer.current_token() == &Token::Else {
            self.lexer.expect_next(&Token::Char(':'))?;
            self.lexer.next_token()?;
            Some(Box::new(self.parse_suite()?))
        } else {
            None
        };
        Ok(Statement::IfElse {
            condition: Box::new(condition),
            if_body: Box::new(if_body),
            else_body,
        })
    }

    fn parse_return(&mut self) -> ParseResult<Statement> {
        self.lexer.next_token()?;
        let statement = if matches!(
            self.lexer.current_token(),
            Token::Newline | Token::Dedent | Token::Eof
        ) {
            Statement::Constant {
                value: ObjectHolder::none(),
            }
        } else {
            self.parse_test()?
        };
        self.expect_statement_end()?;
        Ok(Statement::Return {
            statement: Box::new(statement),
        })
    }

    fn parse_print(&mut self) -> ParseResult<Statement> {
        self.lexer.next_token()?;
        let mut args = Vec::new();
        if !matches!(
            self.lexer.current_token(),
            Token::Newline | Token::Dedent | Token::Eof
        ) {
            args.push(self.parse_test()?);
            while self.lexer.current_token() == &Token::Char(',') {
                self.lexer.next_token()?;
                args.push(self.parse_test()?);
            }
        }
        self.expect_statement_end()?;
        Ok(Statement::Print { args })
    }

    fn parse_assignment_or_expression(&mut self) -> ParseResult<Statement> {
        let expr = self.parse_test()?;
        if self.lexer.current_token() != &Token::Char('=') {
            return Ok(expr);
        }
        self.lexer.next_token()?;
        let rv = self.parse_test()?;
        let Statement::VariableValue { mut dotted_ids } = expr else {
            return Err(ParseError::InvalidAssignmentTarget);
        };
        let Some(last) = dotted_ids.pop() else {
            return Err(ParseError::InvalidAssignmentTarget);
        };
        if dotted_ids.is_empty() {
            Ok(Statement::Assignment {
                var: last,
                rv: Box::new(rv),
            })
        } else {
            Ok(Statement::FieldAssignment {
                object: Box::new(Statement::VariableValue { dotted_ids }),
                field_name: last,
                rv: Box::new(rv),
            })
        }
    }

    fn parse_test(&mut self) -> ParseResult<Statement> {
        let mut lhs = self.parse_and_test()?;
        while self.lexer.current_token() == &Token::Or {
            self.lexer.next_token()?;
            let rhs = self.parse_and_test()?;
            lhs = Statement::Or {
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_and_test(&mut self) -> ParseResult<Statement> {
        let mut lhs = self.parse_not_test()?;
        while self.lexer.current_token() == &Token::And {
            self.lexer.next_token()?;
            let rhs = self.parse_not_test()?;
            lhs = Statement::And {
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_not_test(&mut self) -> ParseResult<Statement> {
        if self.lexer.current_token() == &Token::Not {
            self.lexer.next_token()?;
            let argument = self.parse_not_test()?;
            return Ok(Statement::Not {
                argument: Box::new(argument),
            });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> ParseResult<Statement> {
        let lhs = self.parse_additive()?;
        let comparator: Comparator = match self.lexer.current_token() {
            Token::Eq => runtime::equal,
            Token::NotEq => runtime::not_equal,
            Token::LessOrEq => runtime::less_or_equal,
            Token::GreaterOrEq => runtime::greater_or_equal,
            Token::Char('<') => runtime::less,
            Token::Char('>') => runtime::greater,
            _ => return Ok(lhs),
        };
        self.lexer.next_token()?;
        let rhs = self.parse_additive()?;
        Ok(Statement::Comparison {
            comparator,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    fn parse_additive(&mut self) -> ParseResult<Statement> {
        let mut lhs = self.parse_term()?;
        loop {
            match self.lexer.current_token() {
                Token::Char('+') => {
                    self.lexer.next_token()?;
                    let rhs = self.parse_term()?;
                    lhs = Statement::Add {
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    };
                }
                Token::Char('-') => {
                    self.lexer.next_token()?;
                    let rhs = self.parse_term()?;
                    lhs = Statement::Sub {
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    };
                }
                _ => break,
            }
        }
        Ok(lhs)
    }

    fn parse_term(&mut self) -> ParseResult<Statement> {
        let mut lhs = self.parse_factor()?;
        loop {
            match self.lexer.current_token() {
                Token::Char('*') => {
                    self.lexer.next_token()?;
                    let rhs = self.parse_factor()?;
                    lhs = Statement::Mult {
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    };
                }
                Token::Char('/') => {
                    self.lexer.next_token()?;
                    let rhs = self.parse_factor()?;
                    lhs = Statement::Div {
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    };
                }
                _ => break,
            }
        }
        Ok(lhs)
    }

    fn parse_factor(&mut self) -> ParseResult<Statement> {
        match self.lexer.current_token().clone() {
            Token::Number(value) => {
                self.lexer.next_token()?;
                Ok(Statement::Constant {
                    value: ObjectHolder::own(Object::Number(value)),
                })
            }
            Token::String(value) => {
                self.lexer.next_token()?;
                Ok(Statement::Constant {
                    value: ObjectHolder::own(Object::String(value)),
                })
            }
            Token::True => {
                self.lexer.next_token()?;
                Ok(Statement::Constant {
                    value: ObjectHolder::own(Object::Bool(true)),
                })
            }
            Token::False => {
                self.lexer.next_token()?;
                Ok(Statement::Constant {
                    value: ObjectHolder::own(Object::Bool(false)),
                })
            }
            Token::None => {
                self.lexer.next_token()?;
                Ok(Statement::Constant {
                    value: ObjectHolder::none(),
                })
            }
            Token::Char('(') => {
                self.lexer.next_token()?;
                let expr = self.parse_test()?;
                self.lexer.expect(&Token::Char(')'))?;
                self.lexer.next_token()?;
                self.parse_call_suffix(expr)
            }
            Token::Id(_) => self.parse_reference(),
            other => Err(ParseError::ExpectedExpression {
                found: other.to_string(),
            }),
        }
    }

    /// Dotted identifiers, optionally called: a variable, a field path,
    /// `str(...)`, a class instantiation, or a method call.
    fn parse_reference(&mut self) -> ParseResult<Statement> {
        let first = self.lexer.expect_id()?.to_string();
        self.lexer.next_token()?;
        let mut rest = Vec::new();
        while self.lexer.current_token() == &Token::Char('.') {
            rest.push(self.lexer.expect_next_id()?);
            self.lexer.next_token()?;
        }

        if self.lexer.current_token() != &Token::Char('(') {
            let mut dotted_ids = vec![first];
            dotted_ids.append(&mut rest);
            return Ok(Statement::VariableValue { dotted_ids });
        }

        let mut args = self.parse_call_args()?;
        let base = match rest.pop() {
            // `a.b.m(...)`: everything before the last id is the receiver path.
            Some(method) => {
                let mut dotted_ids = vec![first];
                dotted_ids.append(&mut rest);
                Statement::MethodCall {
                    object: Box::new(Statement::VariableValue { dotted_ids }),
                    method,
                    args,
                }
            }
            None if first == "str" => {
                if args.len() != 1 {
                    return Err(ParseError::StringifyArity { found: args.len() });
                }
                Statement::Stringify {
                    argument: Box::new(args.remove(0)),
                }
            }
            None => Statement::NewInstance {
                class: self.lookup_class(&first)?,
                args,
            },
        };
        self.parse_call_suffix(base)
    }

    /// Further `.name(args)` method calls chained onto an expression result.
    fn parse_call_suffix(&mut self, mut expr: Statement) -> ParseResult<Statement> {
        while self.lexer.current_token() == &Token::Char('.') {
            let method = self.lexer.expect_next_id()?;
            self.lexer.next_token()?;
            let args = self.parse_call_args()?;
            expr = Statement::MethodCall {
                object: Box::new(expr),
                method,
                args,
            };
        }
        Ok(expr)
    }

    fn parse_call_args(&mut self) -> ParseResult<Vec<Statement>> {
        self.lexer.expect(&Token::Char('('))?;
        self.lexer.next_token()?;
        let mut args = Vec::new();
        if self.lexer.current_token() != &Token::Char(')') {
            args.push(self.parse_test()?);
            while self.lexer.current_token() == &Token::Char(',') {
                self.lexer.next_token()?;
                args.push(self.parse_test()?);
            }
        }
        self.lexer.expect(&Token::Char(')'))?;
        self.lexer.next_token()?;
        Ok(args)
    }

    fn expect_statement_end(&mut self) -> ParseResult<()> {
        match self.lexer.current_token() {
            Token::Newline => {
                self.lexer.next_token()?;
                Ok(())
            }
            // The lexer omits the final newline when it flushes dedents at EOF.
            Token::Dedent | Token::Eof => Ok(()),
            _ => {
                self.lexer.expect(&Token::Newline)?;
                Ok(())
            }
        }
    }

    fn lookup_class(&self, name: &str) -> ParseResult<Rc<Class>> {
        self.classes
            .get(name)
            .cloned()
            .ok_or_else(|| ParseError::UnknownClassName {
                name: name.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    fn parse_single(input: &str) -> Statement {
        let program = parse_program(input).expect("parse failed");
        let Statement::Compound { mut statements } = program else {
            panic!("program root must be a compound statement");
        };
        assert_eq!(statements.len(), 1);
        statements.remove(0)
    }

    #[test]
    fn parses_assignment_to_a_name() {
        let statement = parse_single("x = 1\n");
        let Statement::Assignment { var, rv } = statement else {
            panic!("expected an assignment");
        };
        assert_eq!(var, "x");
        assert!(matches!(*rv, Statement::Constant { .. }));
    }

    #[test]
    fn parses_field_assignment() {
        let statement = parse_single("self.value = 1\n");
        let Statement::FieldAssignment {
            object, field_name, ..
        } = statement
        else {
            panic!("expected a field assignment");
        };
        assert_eq!(field_name, "value");
        let Statement::VariableValue { dotted_ids } = *object else {
            panic!("expected a variable receiver");
        };
        assert_eq!(dotted_ids, vec!["self".to_string()]);
    }

    #[test]
    fn rejects_non_variable_assignment_targets() {
        let err = parse_program("x + 1 = 2\n").expect_err("target is not assignable");
        assert_eq!(err, ParseError::InvalidAssignmentTarget);
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        let statement = parse_single("1 + 2 * 3\n");
        let Statement::Add { rhs, .. } = statement else {
            panic!("expected an addition at the top");
        };
        assert!(matches!(*rhs, Statement::Mult { .. }));
    }

    #[test]
    fn not_applies_to_a_whole_comparison() {
        let statement = parse_single("not 1 == 2\n");
        let Statement::Not { argument } = statement else {
            panic!("expected a negation at the top");
        };
        assert!(matches!(*argument, Statement::Comparison { .. }));
    }

    #[test]
    fn or_binds_looser_than_and() {
        let statement = parse_single("x and y or z\n");
        let Statement::Or { lhs, .. } = statement else {
            panic!("expected `or` at the top");
        };
        assert!(matches!(*lhs, Statement::And { .. }));
    }

    #[test]
    fn parses_print_with_multiple_arguments() {
        let statement = parse_single("print 1, x, 'hi'\n");
        let Statement::Print { args } = statement else {
            panic!("expected a print statement");
        };
        assert_eq!(args.len(), 3);
    }

    #[test]
    fn parses_class_definition_and_registers_it() {
        let input = indoc! {"
            class Box:
              def __init__(self, value):
                self.value = value

              def get(self):
                return self.value

            b = Box(1)
        "};
        let program = parse_program(input).expect("parse failed");
        let Statement::Compound { statements } = program else {
            panic!("program root must be a compound statement");
        };
        assert_eq!(statements.len(), 2);

        let Statement::ClassDefinition { class } = &statements[0] else {
            panic!("expected a class definition first");
        };
        assert_eq!(class.name(), "Box");
        // The declared receiver is stripped from the formal parameters.
        assert!(class.has_method("__init__", 1));
        assert!(class.has_method("get", 0));

        assert!(matches!(&statements[1], Statement::Assignment { .. }));
    }

    #[test]
    fn resolves_parent_classes_by_name() {
        let input = indoc! {"
            class A:
              def hello(self):
                return 'hi'

            class B(A):
              def noop(self):
                return None
        "};
        let program = parse_program(input).expect("parse failed");
        let Statement::Compound { statements } = program else {
            panic!("program root must be a compound statement");
        };
        let Statement::ClassDefinition { class } = &statements[1] else {
            panic!("expected a class definition");
        };
        assert_eq!(class.name(), "B");
        assert!(class.has_method("hello", 0));
    }

    #[test]
    fn rejects_instantiation_of_unknown_classes() {
        let err = parse_program("b = Box()\n").expect_err("class was never defined");
        assert_eq!(
            err,
            ParseError::UnknownClassName {
                name: "Box".to_string(),
            }
        );
    }

    #[test]
    fn maps_str_calls_to_stringify() {
        let statement = parse_single("x = str(1)\n");
        let Statement::Assignment { rv, .. } = statement else {
            panic!("expected an assignment");
        };
        assert!(matches!(*rv, Statement::Stringify { .. }));

        let err = parse_program("x = str(1, 2)\n").expect_err("str takes one argument");
        assert_eq!(err, ParseError::StringifyArity { found: 2 });
    }

    #[test]
    fn parses_method_calls_on_dotted_receivers() {
        let statement = parse_single("a.b.update(1, 2)\n");
        let Statement::MethodCall {
            object,
            method,
            args,
        } = statement
        else {
            panic!("expected a method call");
        };
        assert_eq!(method, "update");
        assert_eq!(args.len(), 2);
        let Statement::VariableValue { dotted_ids } = *object else {
            panic!("expected a variable receiver");
        };
        assert_eq!(dotted_ids, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn parses_chained_calls_on_call_results() {
        let input = indoc! {"
            class A:
              def me(self):
                return self

            x = A().me().me()
        "};
        let program = parse_program(input).expect("parse failed");
        let Statement::Compound { statements } = program else {
            panic!("program root must be a compound statement");
        };
        let Statement::Assignment { rv, .. } = &statements[1] else {
            panic!("expected an assignment");
        };
        let Statement::MethodCall { object, .. } = rv.as_ref() else {
            panic!("expected a method call");
        };
        assert!(matches!(object.as_ref(), Statement::MethodCall { .. }));
    }

    #[test]
    fn parses_if_else_with_suites() {
        let input = indoc! {"
            if x > 0:
              print 'positive'
            else:
              print 'non-positive'
        "};
        let statement = parse_single(input);
        let Statement::IfElse {
            condition,
            else_body,
            ..
        } = statement
        else {
            panic!("expected an if/else statement");
        };
        assert!(matches!(*condition, Statement::Comparison { .. }));
        assert!(else_body.is_some());
    }

    #[test]
    fn bare_return_yields_none() {
        let input = indoc! {"
            class A:
              def noop(self):
                return
        "};
        let program = parse_program(input).expect("parse failed");
        let Statement::Compound { statements } = program else {
            panic!("program root must be a compound statement");
        };
        let Statement::ClassDefinition { class } = &statements[0] else {
            panic!("expected a class definition");
        };
        assert!(class.has_method("noop", 0));
    }

    #[test]
    fn missing_indentation_is_a_lex_level_failure() {
        let err = parse_program("if x:\nprint 1\n").expect_err("suite must be indented");
        assert!(matches!(err, ParseError::Lex(LexError::UnexpectedToken { .. })));
    }

    #[test]
    fn expression_statements_are_allowed() {
        let input = indoc! {"
            class A:
              def ping(self):
                return 1

            a = A()
            a.ping()
        "};
        let program = parse_program(input).expect("parse failed");
        let Statement::Compound { statements } = program else {
            panic!("program root must be a compound statement");
        };
        assert!(matches!(&statements[2], Statement::MethodCall { .. }));
    }
}
