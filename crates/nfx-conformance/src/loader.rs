#![forbid(unsafe_code)]

//! Loader for declarative operator fixtures (`*.mod.py`).
//!
//! A fixture binds variables to operands, declares exactly one operation and
//! lists one or more examples:
//!
//! ```text
//! model = Model()
//! i1 = Input("op1", "TENSOR_FLOAT32", "{2,2,2,2}")
//! axis = Int32Scalar("axis", 3)
//! num_out = Int32Scalar("num_out", 2)
//! i2 = Output("op2", "TENSOR_FLOAT32", "{2,2,2,1}")
//! i3 = Output("op3", "TENSOR_FLOAT32", "{2,2,2,1}")
//! model = model.Operation("SPLIT", i1, axis, num_out).To([i2, i3])
//! input0 = {i1: [1.0, 2.0, ...]}
//! output0 = {i2: [...], i3: [...]}
//! Example((input0, output0))
//! ```
//!
//! Only this statement subset is understood; anything else is a parse error.

use crate::bundle::ExampleBundle;
use crate::{FixtureError, sha256_hex};
use nfx_op::{OpError, OpKind, Operand, OperationDeclaration, declare_operation};
use nfx_tensor::{ElementType, ScalarParameter, TensorDescriptor, TensorError};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// Deepest bracket nesting a fixture may use; the parser recurses once per level.
const MAX_NESTING: usize = 64;

/// The declaration and examples of one fixture.
#[derive(Debug, Clone)]
pub struct LoadedModel {
    pub declaration: Arc<OperationDeclaration>,
    pub bundles: Vec<ExampleBundle>,
    /// SHA-256 of the fixture text, hex encoded.
    pub sha256: String,
}

pub fn load_model(text: &str) -> Result<LoadedModel, FixtureError> {
    let tokens = tokenize(text)?;
    let statements = Parser { tokens, pos: 0 }.parse_program()?;

    let mut eval = Evaluator::default();
    let mut last_line = 1;
    for stmt in &statements {
        last_line = stmt.line;
        let value = eval.eval(&stmt.expr, stmt.line)?;
        if let Some(target) = &stmt.target {
            eval.vars.insert(target.clone(), value);
        }
    }

    let Some(declaration) = eval.declaration else {
        return Err(parse_error(last_line, "fixture declares no Operation"));
    };
    if eval.examples.is_empty() {
        return Err(parse_error(last_line, "fixture declares no Example"));
    }

    let mut bundles = Vec::with_capacity(eval.examples.len());
    for example in eval.examples {
        bundles.push(ExampleBundle::new(
            Arc::clone(&declaration),
            example.inputs,
            example.outputs,
        )?);
    }

    Ok(LoadedModel {
        declaration,
        bundles,
        sha256: sha256_hex(text.as_bytes()),
    })
}

pub fn load_model_file(path: &Path) -> Result<LoadedModel, FixtureError> {
    let raw = fs::read_to_string(path).map_err(|err| FixtureError::Io {
        path: path.display().to_string(),
        detail: err.to_string(),
    })?;
    load_model(&raw)
}

fn parse_error(line: usize, detail: impl Into<String>) -> FixtureError {
    FixtureError::Parse {
        line,
        detail: detail.into(),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Str(String),
    Num(f64),
    Punct(char),
    Newline,
}

#[derive(Debug, Clone, PartialEq)]
struct Token {
    tok: Tok,
    line: usize,
}

fn tokenize(text: &str) -> Result<Vec<Token>, FixtureError> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut line = 1usize;
    let mut depth = 0usize;
    let mut i = 0usize;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            '\n' => {
                // newlines inside brackets continue the statement
                if depth == 0 {
                    tokens.push(Token {
                        tok: Tok::Newline,
                        line,
                    });
                }
                line += 1;
                i += 1;
            }
            '#' => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '\\' if next == Some('\n') => {
                line += 1;
                i += 2;
            }
            c if c.is_whitespace() => i += 1,
            '"' | '\'' => {
                let start_line = line;
                let mut value = String::new();
                i += 1;
                loop {
                    match chars.get(i).copied() {
                        None | Some('\n') => {
                            return Err(parse_error(start_line, "unterminated string literal"));
                        }
                        Some('\\') => {
                            let escaped = chars.get(i + 1).copied().ok_or_else(|| {
                                parse_error(start_line, "unterminated string literal")
                            })?;
                            value.push(escaped);
                            i += 2;
                        }
                        Some(ch) if ch == c => {
                            i += 1;
                            break;
                        }
                        Some(ch) => {
                            value.push(ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token {
                    tok: Tok::Str(value),
                    line: start_line,
                });
            }
            '(' | '[' | '{' => {
                depth += 1;
                if depth > MAX_NESTING {
                    return Err(parse_error(
                        line,
                        format!("brackets nested deeper than {MAX_NESTING} levels"),
                    ));
                }
                tokens.push(Token {
                    tok: Tok::Punct(c),
                    line,
                });
                i += 1;
            }
            ')' | ']' | '}' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| parse_error(line, format!("unbalanced '{c}'")))?;
                tokens.push(Token {
                    tok: Tok::Punct(c),
                    line,
                });
                i += 1;
            }
            c if c.is_ascii_digit()
                || (matches!(c, '-' | '+' | '.')
                    && next.is_some_and(|n| n.is_ascii_digit() || n == '.')) =>
            {
                let start = i;
                i += 1;
                while i < chars.len() {
                    let ch = chars[i];
                    let exponent_sign =
                        matches!(ch, '-' | '+') && matches!(chars[i - 1], 'e' | 'E');
                    if ch.is_ascii_digit() || matches!(ch, '.' | 'e' | 'E') || exponent_sign {
                        i += 1;
                    } else {
                        break;
                    }
                }
                let raw: String = chars[start..i].iter().collect();
                let value: f64 = raw
                    .parse()
                    .map_err(|_| parse_error(line, format!("invalid number '{raw}'")))?;
                tokens.push(Token {
                    tok: Tok::Num(value),
                    line,
                });
            }
            '=' | ',' | ':' | '.' => {
                tokens.push(Token {
                    tok: Tok::Punct(c),
                    line,
                });
                i += 1;
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token {
                    tok: Tok::Ident(chars[start..i].iter().collect()),
                    line,
                });
            }
            other => {
                return Err(parse_error(line, format!("unexpected character '{other}'")));
            }
        }
    }

    if depth != 0 {
        return Err(parse_error(line, "unclosed bracket at end of fixture"));
    }
    tokens.push(Token {
        tok: Tok::Newline,
        line,
    });
    Ok(tokens)
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Ident(String),
    Str(String),
    Num(f64),
    Call {
        receiver: Option<Box<Expr>>,
        name: String,
        args: Vec<Expr>,
    },
    List(Vec<Expr>),
    Tuple(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
}

#[derive(Debug, Clone, PartialEq)]
struct Statement {
    line: usize,
    target: Option<String>,
    expr: Expr,
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos).map(|t| &t.tok)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map_or(1, |t| t.line)
    }

    fn next(&mut self) -> Option<Tok> {
        let tok = self.tokens.get(self.pos).map(|t| t.tok.clone());
        self.pos += 1;
        tok
    }

    fn eat(&mut self, punct: char) -> bool {
        if self.peek() == Some(&Tok::Punct(punct)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, punct: char) -> Result<(), FixtureError> {
        if self.eat(punct) {
            Ok(())
        } else {
            Err(parse_error(
                self.line(),
                format!("expected '{punct}', found {}", self.describe()),
            ))
        }
    }

    fn describe(&self) -> String {
        match self.peek() {
            None => "end of fixture".to_string(),
            Some(Tok::Newline) => "end of line".to_string(),
            Some(Tok::Ident(name)) => format!("'{name}'"),
            Some(Tok::Str(s)) => format!("string \"{s}\""),
            Some(Tok::Num(n)) => format!("number {n}"),
            Some(Tok::Punct(c)) => format!("'{c}'"),
        }
    }

    fn parse_program(mut self) -> Result<Vec<Statement>, FixtureError> {
        let mut statements = Vec::new();
        loop {
            while self.peek() == Some(&Tok::Newline) {
                self.pos += 1;
            }
            if self.peek().is_none() {
                return Ok(statements);
            }
            statements.push(self.parse_statement()?);
        }
    }

    fn parse_statement(&mut self) -> Result<Statement, FixtureError> {
        let line = self.line();
        let is_assignment = matches!(self.peek(), Some(Tok::Ident(_)))
            && self.tokens.get(self.pos + 1).map(|t| &t.tok) == Some(&Tok::Punct('='));
        let target = if is_assignment {
            let Some(Tok::Ident(name)) = self.next() else {
                return Err(parse_error(line, "expected assignment target"));
            };
            self.pos += 1;
            Some(name)
        } else {
            None
        };

        let expr = self.parse_expr()?;
        match self.peek() {
            Some(Tok::Newline) | None => {
                self.pos += 1;
                Ok(Statement { line, target, expr })
            }
            Some(_) => Err(parse_error(
                self.line(),
                format!("unexpected {} after statement", self.describe()),
            )),
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, FixtureError> {
        let mut expr = self.parse_primary()?;
        while self.eat('.') {
            let line = self.line();
            let Some(Tok::Ident(name)) = self.next() else {
                return Err(parse_error(line, "expected method name after '.'"));
            };
            self.expect('(')?;
            let args = self.parse_sequence(')')?;
            expr = Expr::Call {
                receiver: Some(Box::new(expr)),
                name,
                args,
            };
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, FixtureError> {
        let line = self.line();
        match self.next() {
            Some(Tok::Ident(name)) => {
                if self.eat('(') {
                    let args = self.parse_sequence(')')?;
                    Ok(Expr::Call {
                        receiver: None,
                        name,
                        args,
                    })
                } else {
                    Ok(Expr::Ident(name))
                }
            }
            Some(Tok::Str(s)) => Ok(Expr::Str(s)),
            Some(Tok::Num(n)) => Ok(Expr::Num(n)),
            Some(Tok::Punct('[')) => Ok(Expr::List(self.parse_sequence(']')?)),
            Some(Tok::Punct('(')) => {
                let start = self.pos;
                let mut items = self.parse_sequence(')')?;
                // `(x)` groups, `(x,)` and `(x, y)` build tuples
                let trailing_comma = self
                    .tokens
                    .get(self.pos.saturating_sub(2))
                    .is_some_and(|t| t.tok == Tok::Punct(','));
                if items.len() == 1 && !trailing_comma && self.pos > start + 1 {
                    Ok(items.remove(0))
                } else {
                    Ok(Expr::Tuple(items))
                }
            }
            Some(Tok::Punct('{')) => {
                let mut entries = Vec::new();
                loop {
                    if self.eat('}') {
                        break;
                    }
                    let key = self.parse_expr()?;
                    self.expect(':')?;
                    let value = self.parse_expr()?;
                    entries.push((key, value));
                    if !self.eat(',') {
                        self.expect('}')?;
                        break;
                    }
                }
                Ok(Expr::Dict(entries))
            }
            _ => {
                self.pos = self.pos.saturating_sub(1);
                Err(parse_error(
                    line,
                    format!("expected an expression, found {}", self.describe()),
                ))
            }
        }
    }

    /// Comma separated expressions up to `close`, trailing comma allowed.
    fn parse_sequence(&mut self, close: char) -> Result<Vec<Expr>, FixtureError> {
        let mut items = Vec::new();
        loop {
            if self.eat(close) {
                return Ok(items);
            }
            items.push(self.parse_expr()?);
            if !self.eat(',') {
                self.expect(close)?;
                return Ok(items);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Input,
    Output,
    Constant,
}

#[derive(Debug, Clone)]
enum Value {
    Unit,
    Number(f64),
    Str(String),
    List(Vec<Value>),
    Tuple(Vec<Value>),
    Map(Vec<(Value, Value)>),
    Model { declared: bool },
    Operand { operand: Operand, role: Role },
    PendingOperation { kind: OpKind, inputs: Vec<Operand> },
}

impl Value {
    fn kind_name(&self) -> &'static str {
        match self {
            Self::Unit => "nothing",
            Self::Number(_) => "number",
            Self::Str(_) => "string",
            Self::List(_) => "list",
            Self::Tuple(_) => "tuple",
            Self::Map(_) => "dict",
            Self::Model { .. } => "model",
            Self::Operand { .. } => "operand",
            Self::PendingOperation { .. } => "operation",
        }
    }
}

struct PendingExample {
    inputs: Vec<(String, Vec<f64>)>,
    outputs: Vec<(String, Vec<f64>)>,
}

#[derive(Default)]
struct Evaluator {
    vars: BTreeMap<String, Value>,
    operand_names: BTreeSet<String>,
    declaration: Option<Arc<OperationDeclaration>>,
    examples: Vec<PendingExample>,
}

fn tensor_error(line: usize, err: TensorError) -> FixtureError {
    match err {
        TensorError::UnknownElementType { type_name } => {
            parse_error(line, format!("unknown operand type '{type_name}'"))
        }
        other => FixtureError::Tensor(other),
    }
}

fn expect_str(value: &Value, what: &str, line: usize) -> Result<String, FixtureError> {
    match value {
        Value::Str(s) => Ok(s.clone()),
        other => Err(parse_error(
            line,
            format!("{what} must be a string, got {}", other.kind_name()),
        )),
    }
}

fn expect_number(value: &Value, what: &str, line: usize) -> Result<f64, FixtureError> {
    match value {
        Value::Number(n) => Ok(*n),
        other => Err(parse_error(
            line,
            format!("{what} must be a number, got {}", other.kind_name()),
        )),
    }
}

fn expect_arity(name: &str, args: &[Value], count: usize, line: usize) -> Result<(), FixtureError> {
    if args.len() == count {
        Ok(())
    } else {
        Err(parse_error(
            line,
            format!("{name}() takes {count} arguments, got {}", args.len()),
        ))
    }
}

impl Evaluator {
    fn eval(&mut self, expr: &Expr, line: usize) -> Result<Value, FixtureError> {
        match expr {
            Expr::Ident(name) => match name.as_str() {
                "True" => Ok(Value::Number(1.0)),
                "False" => Ok(Value::Number(0.0)),
                _ => self
                    .vars
                    .get(name)
                    .cloned()
                    .ok_or_else(|| parse_error(line, format!("undefined name '{name}'"))),
            },
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::Num(n) => Ok(Value::Number(*n)),
            Expr::List(items) => Ok(Value::List(self.eval_all(items, line)?)),
            Expr::Tuple(items) => Ok(Value::Tuple(self.eval_all(items, line)?)),
            Expr::Dict(entries) => {
                let mut out = Vec::with_capacity(entries.len());
                for (key, value) in entries {
                    out.push((self.eval(key, line)?, self.eval(value, line)?));
                }
                Ok(Value::Map(out))
            }
            Expr::Call {
                receiver,
                name,
                args,
            } => {
                let args = self.eval_all(args, line)?;
                match receiver {
                    None => self.call(name, args, line),
                    Some(receiver) => {
                        let receiver = self.eval(receiver, line)?;
                        self.call_method(receiver, name, args, line)
                    }
                }
            }
        }
    }

    fn eval_all(&mut self, exprs: &[Expr], line: usize) -> Result<Vec<Value>, FixtureError> {
        exprs.iter().map(|e| self.eval(e, line)).collect()
    }

    fn register_name(&mut self, name: &str, line: usize) -> Result<(), FixtureError> {
        if self.operand_names.insert(name.to_string()) {
            Ok(())
        } else {
            Err(parse_error(
                line,
                format!("operand name '{name}' is declared more than once"),
            ))
        }
    }

    fn call(&mut self, name: &str, args: Vec<Value>, line: usize) -> Result<Value, FixtureError> {
        match name {
            "Model" => {
                if let Some(arg) = args.first() {
                    expect_str(arg, "model name", line)?;
                }
                if args.len() > 1 {
                    return Err(parse_error(line, "Model() takes at most one argument"));
                }
                Ok(Value::Model { declared: false })
            }
            "Input" | "Output" => {
                expect_arity(name, &args, 3, line)?;
                let operand_name = expect_str(&args[0], "operand name", line)?;
                let type_name = expect_str(&args[1], "operand type", line)?;
                let shape = expect_str(&args[2], "operand shape", line)?;
                let desc = TensorDescriptor::parse(operand_name.as_str(), &type_name, &shape)
                    .map_err(|err| tensor_error(line, err))?;
                self.register_name(&operand_name, line)?;
                let role = if name == "Input" {
                    Role::Input
                } else {
                    Role::Output
                };
                Ok(Value::Operand {
                    operand: Operand::Tensor(desc),
                    role,
                })
            }
            "Int32Scalar" | "Float32Scalar" | "BoolScalar" => {
                expect_arity(name, &args, 2, line)?;
                let operand_name = expect_str(&args[0], "scalar name", line)?;
                let literal = expect_number(&args[1], "scalar value", line)?;
                let ty = match name {
                    "Int32Scalar" => ElementType::Int32,
                    "Float32Scalar" => ElementType::Float32,
                    _ => ElementType::Bool,
                };
                let scalar = ScalarParameter::new(operand_name.as_str(), ty, literal)
                    .map_err(|err| tensor_error(line, err))?;
                self.register_name(&operand_name, line)?;
                Ok(Value::Operand {
                    operand: Operand::Scalar(scalar),
                    role: Role::Constant,
                })
            }
            "Example" => {
                expect_arity(name, &args, 1, line)?;
                let pairs = match args.into_iter().next() {
                    Some(Value::List(items)) => items,
                    Some(pair @ Value::Tuple(_)) => vec![pair],
                    Some(other) => {
                        return Err(parse_error(
                            line,
                            format!(
                                "Example() expects an (inputs, outputs) tuple, got {}",
                                other.kind_name()
                            ),
                        ));
                    }
                    None => Vec::new(),
                };
                for pair in pairs {
                    let Value::Tuple(mut parts) = pair else {
                        return Err(parse_error(
                            line,
                            "each example must be an (inputs, outputs) tuple",
                        ));
                    };
                    if parts.len() != 2 {
                        return Err(parse_error(
                            line,
                            format!("example tuple has {} items, expected 2", parts.len()),
                        ));
                    }
                    let outputs = literal_map(parts.remove(1), Role::Output, line)?;
                    let inputs = literal_map(parts.remove(0), Role::Input, line)?;
                    self.examples.push(PendingExample { inputs, outputs });
                }
                Ok(Value::Unit)
            }
            other => Err(parse_error(line, format!("unknown constructor '{other}'"))),
        }
    }

    fn call_method(
        &mut self,
        receiver: Value,
        name: &str,
        args: Vec<Value>,
        line: usize,
    ) -> Result<Value, FixtureError> {
        match (receiver, name) {
            (Value::Model { declared }, "Operation") => {
                if declared || self.declaration.is_some() {
                    return Err(parse_error(
                        line,
                        "fixture declares more than one Operation",
                    ));
                }
                let mut args = args.into_iter();
                let op_name = args
                    .next()
                    .ok_or_else(|| parse_error(line, "Operation() requires an operator name"))
                    .and_then(|v| expect_str(&v, "operator name", line))?;
                let kind = OpKind::parse(&op_name).ok_or_else(|| {
                    FixtureError::Op(OpError::SignatureMismatch {
                        op: op_name.clone(),
                        detail: "operator kind has no registered signature".to_string(),
                    })
                })?;
                let mut inputs = Vec::new();
                for arg in args {
                    match arg {
                        Value::Operand {
                            role: Role::Output,
                            operand,
                        } => {
                            return Err(parse_error(
                                line,
                                format!(
                                    "'{}' is declared as an Output but used as an operation input",
                                    operand.name()
                                ),
                            ));
                        }
                        Value::Operand { operand, .. } => inputs.push(operand),
                        other => {
                            return Err(parse_error(
                                line,
                                format!(
                                    "operation inputs must be operands, got {}",
                                    other.kind_name()
                                ),
                            ));
                        }
                    }
                }
                Ok(Value::PendingOperation { kind, inputs })
            }
            (Value::PendingOperation { kind, inputs }, "To") => {
                let items = match <[Value; 1]>::try_from(args) {
                    Ok([Value::List(items)]) => items,
                    Ok([single]) => vec![single],
                    Err(args) => args,
                };
                let mut outputs = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::Operand {
                            operand: Operand::Tensor(desc),
                            role: Role::Output,
                        } => outputs.push(desc),
                        Value::Operand { operand, .. } => {
                            return Err(parse_error(
                                line,
                                format!(
                                    "'{}' must be declared with Output() to be an operation output",
                                    operand.name()
                                ),
                            ));
                        }
                        other => {
                            return Err(parse_error(
                                line,
                                format!(
                                    "operation outputs must be operands, got {}",
                                    other.kind_name()
                                ),
                            ));
                        }
                    }
                }
                let declaration =
                    declare_operation(kind, inputs, outputs).map_err(FixtureError::Op)?;
                self.declaration = Some(Arc::new(declaration));
                Ok(Value::Model { declared: true })
            }
            (receiver, method) => Err(parse_error(
                line,
                format!("{} has no method '{method}'", receiver.kind_name()),
            )),
        }
    }
}

fn literal_map(
    value: Value,
    role: Role,
    line: usize,
) -> Result<Vec<(String, Vec<f64>)>, FixtureError> {
    let entries = match value {
        Value::Map(entries) => entries,
        other => {
            return Err(parse_error(
                line,
                format!("example {role:?} literals must be a dict, got {}", other.kind_name()),
            ));
        }
    };

    let mut out = Vec::with_capacity(entries.len());
    for (key, values) in entries {
        let name = match key {
            Value::Operand {
                operand,
                role: key_role,
            } if key_role == role || key_role == Role::Constant => operand.name().to_string(),
            Value::Operand { operand, .. } => {
                return Err(parse_error(
                    line,
                    format!("'{}' is not an {role:?} operand", operand.name()),
                ));
            }
            other => {
                return Err(parse_error(
                    line,
                    format!("example keys must be operands, got {}", other.kind_name()),
                ));
            }
        };
        let Value::List(items) = values else {
            return Err(parse_error(
                line,
                format!("literals for '{name}' must be a list"),
            ));
        };
        let literals = items
            .iter()
            .map(|item| expect_number(item, "tensor literal", line))
            .collect::<Result<Vec<_>, _>>()?;
        out.push((name, literals));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::{MAX_NESTING, Tok, load_model, tokenize};
    use crate::FixtureError;
    use crate::bundle::{ActualOutputs, Tolerance, verify};
    use nfx_op::{OpError, OpKind};

    const SEED: &str = r#"# model
model = Model()
i1 = Input("op1", "TENSOR_FLOAT32", "{2,2,2,2}")
axis = Int32Scalar("axis", 3)
num_out = Int32Scalar("num_out", 2)
i2 = Output("op2", "TENSOR_FLOAT32", "{2,2,2,1}")
i3 = Output("op3", "TENSOR_FLOAT32", "{2,2,2,1}")
model = model.Operation("SPLIT", i1, axis, num_out).To([i2, i3])

# Example 1. Input in operand 0,
input0 = {i1: # input 0
          [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 11.0, 12.0, 13.0, 14.0, 15.0, 16.0]}

output0 = {
    i2: # output 0
          [1.0, 3.0, 5.0, 7.0, 9.0, 11.0, 13.0, 15.0],
    i3: # output 1
          [2.0, 4.0, 6.0, 8.0, 10.0, 12.0, 14.0, 16.0]}

# Instantiate an example
Example((input0, output0))
"#;

    fn with_axis(axis: &str, num_out: &str) -> String {
        SEED.replace(
            "Int32Scalar(\"axis\", 3)",
            &format!("Int32Scalar(\"axis\", {axis})"),
        )
        .replace(
            "Int32Scalar(\"num_out\", 2)",
            &format!("Int32Scalar(\"num_out\", {num_out})"),
        )
    }

    #[test]
    fn tokenizer_joins_bracketed_lines_and_skips_comments() {
        let tokens = tokenize("x = {a: # note\n [1, -2.5e1]}\n").expect("tokens");
        let newlines = tokens.iter().filter(|t| t.tok == Tok::Newline).count();
        assert_eq!(newlines, 2);
        assert!(tokens.iter().any(|t| t.tok == Tok::Num(-25.0)));
        assert_eq!(tokens.last().map(|t| t.line), Some(3));
    }

    #[test]
    fn loads_seed_fixture_and_verifies_expected_outputs() {
        let model = load_model(SEED).expect("seed fixture");
        assert_eq!(model.declaration.kind(), OpKind::Split);
        assert_eq!(model.bundles.len(), 1);
        assert_eq!(model.sha256.len(), 64);

        let outputs = model.declaration.outputs();
        assert_eq!(outputs.len(), 2);
        for out in outputs {
            assert_eq!(out.shape(), &[2, 2, 2, 1]);
            assert_eq!(out.element_count(), 8);
        }

        let bundle = &model.bundles[0];
        assert_eq!(
            bundle.expected("op2"),
            Some([1.0, 3.0, 5.0, 7.0, 9.0, 11.0, 13.0, 15.0].as_slice())
        );
        let mut actual = ActualOutputs::new();
        for name in ["op2", "op3"] {
            actual.insert(
                name.to_string(),
                bundle.expected(name).expect("expected").to_vec(),
            );
        }
        assert!(verify(bundle, &actual, Tolerance::exact()).passed());
    }

    #[test]
    fn negative_axis_loads_like_positive_axis() {
        let negative = load_model(&with_axis("-1", "2")).expect("axis -1");
        let positive = load_model(SEED).expect("axis 3");
        assert_eq!(
            negative.declaration.outputs(),
            positive.declaration.outputs()
        );
    }

    #[test]
    fn indivisible_split_is_rejected() {
        // Only the scalar changes; the two declared outputs stay as they are.
        let err = load_model(&with_axis("3", "3")).expect_err("2 into 3");
        assert!(matches!(
            err,
            FixtureError::Op(OpError::NotDivisible { .. })
        ));
    }

    #[test]
    fn deep_nesting_is_a_parse_error() {
        let deep = format!("x = {}{}\n", "[".repeat(100_000), "]".repeat(100_000));
        let err = load_model(&deep).expect_err("deep nesting");
        assert_eq!(err.reason_code(), "fixture_parse_error");
        assert!(matches!(err, FixtureError::Parse { line: 1, .. }), "{err:?}");
        assert!(err.to_string().contains("nested deeper than 64"), "{err}");

        let shallow = format!("x = {}{}\n", "[".repeat(MAX_NESTING), "]".repeat(MAX_NESTING));
        assert!(tokenize(&shallow).is_ok());
    }

    #[test]
    fn out_of_range_axis_is_rejected() {
        let err = load_model(&with_axis("4", "2")).expect_err("axis 4");
        assert_eq!(err.reason_code(), "split_invalid_axis");
    }

    #[test]
    fn malformed_statements_report_lines() {
        let err = load_model("model = Model()\ni1 = Input(\"op1\", \"TENSOR_FLOAT32\"\n")
            .expect_err("unclosed");
        assert!(matches!(err, FixtureError::Parse { .. }));

        let err = load_model("model = Model()\nx = Bogus(1)\n").expect_err("constructor");
        assert!(matches!(err, FixtureError::Parse { line: 2, .. }), "{err:?}");

        let err = load_model("model = Model()\nx = y\n").expect_err("undefined");
        assert!(err.to_string().contains("undefined name 'y'"));

        let err = load_model("model = Model() extra\n").expect_err("trailing");
        assert!(matches!(err, FixtureError::Parse { line: 1, .. }));
    }

    #[test]
    fn fixture_must_declare_operation_and_example() {
        let without_example = SEED.replace("Example((input0, output0))", "");
        let err = load_model(&without_example).expect_err("no example");
        assert!(err.to_string().contains("no Example"));

        let err = load_model("model = Model()\n").expect_err("no operation");
        assert!(err.to_string().contains("no Operation"));
    }

    #[test]
    fn unknown_types_and_operators() {
        let err = load_model(&SEED.replace(
            "\"TENSOR_FLOAT32\", \"{2,2,2,2}\"",
            "\"TENSOR_FLOAT99\", \"{2,2,2,2}\"",
        ))
        .expect_err("type");
        assert!(matches!(err, FixtureError::Parse { .. }));

        let err = load_model(&SEED.replace("\"SPLIT\"", "\"SPLIT_V\"")).expect_err("operator");
        assert_eq!(err.reason_code(), "op_signature_mismatch");
    }

    #[test]
    fn output_used_as_input_is_rejected() {
        let text = SEED.replace("Operation(\"SPLIT\", i1,", "Operation(\"SPLIT\", i2,");
        let err = load_model(&text).expect_err("role");
        assert!(err.to_string().contains("Output"), "{err}");
    }

    #[test]
    fn duplicate_operand_names_are_rejected() {
        let text = SEED.replace("Output(\"op3\"", "Output(\"op2\"");
        let err = load_model(&text).expect_err("duplicate");
        assert!(matches!(err, FixtureError::Parse { .. }));
    }

    #[test]
    fn literal_count_must_match_element_count() {
        let text = SEED.replace("15.0, 16.0]}", "15.0]}");
        let err = load_model(&text).expect_err("short input");
        assert!(matches!(
            err,
            FixtureError::LengthMismatch {
                expected: 16,
                actual: 15,
                ..
            }
        ));
    }

    #[test]
    fn example_lists_build_multiple_bundles() {
        let text = SEED.replace(
            "Example((input0, output0))",
            "Example([(input0, output0), (input0, output0)])",
        );
        let model = load_model(&text).expect("two examples");
        assert_eq!(model.bundles.len(), 2);
        assert_eq!(model.bundles[0], model.bundles[1]);
    }

    #[test]
    fn single_output_form_and_quantized_operands() {
        let text = r#"
model = Model("q")
i1 = Input("in", "TENSOR_QUANT8_ASYMM", "{4}, 0.5f, 128")
axis = Int32Scalar("axis", 0)
n = Int32Scalar("n", 1)
o1 = Output("out", "TENSOR_QUANT8_ASYMM", "{4}, 0.5f, 128")
model = model.Operation("SPLIT", i1, axis, n).To(o1)
Example(({i1: [1, 2, 3, 255]}, {o1: [1, 2, 3, 255]}))
"#;
        let model = load_model(text).expect("quantized");
        assert_eq!(model.bundles.len(), 1);

        let err = load_model(&text.replace(
            "\"{4}, 0.5f, 128\")\nmodel",
            "\"{4}, 0.25f, 128\")\nmodel",
        ))
        .expect_err("quantization mismatch");
        assert_eq!(err.reason_code(), "op_signature_mismatch");

        let err = load_model(&text.replace("3, 255]}, {o1", "3, 256]}, {o1"))
            .expect_err("out of range literal");
        assert!(matches!(err, FixtureError::Binding { .. }));
    }
}
