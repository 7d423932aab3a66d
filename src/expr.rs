//! String expressions evaluated against tree branches
//!
//! Selections, projected quantities and weights are all given as strings
//! such as `tp.mass > 60 && abs(probe.eta) < 1.4442`. They are compiled once
//! into an expression tree, then bound to a concrete [`Tree`] before being
//! evaluated entry by entry.
//!
//! Expressions which refer to a jagged (per-object) branch without an explicit
//! index are evaluated once per object instance of the entry, as many times as
//! the shortest such branch has elements. Scalar branches are broadcast to
//! every instance.

use crate::{
    error::{Error, Result},
    tree::{Branch, Tree},
};

/// Parsed expression tree
#[derive(Clone, Debug)]
enum Node {
    Number(f64),
    Branch { slot: usize, index: Option<usize> },
    Neg(Box<Node>),
    Not(Box<Node>),
    Binary(BinOp, Box<Node>, Box<Node>),
    Call(Func, Vec<Node>),
}

#[derive(Clone, Copy, Debug)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Clone, Copy, Debug)]
enum Func {
    Abs,
    Sqrt,
    Log,
    Exp,
    Pow,
    Min,
    Max,
}
//
impl Func {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "abs" => Func::Abs,
            "sqrt" => Func::Sqrt,
            "log" => Func::Log,
            "exp" => Func::Exp,
            "pow" => Func::Pow,
            "min" => Func::Min,
            "max" => Func::Max,
            _ => return None,
        })
    }

    fn arity(self) -> usize {
        match self {
            Func::Pow | Func::Min | Func::Max => 2,
            _ => 1,
        }
    }
}

/// A compiled expression, not yet tied to any particular tree
#[derive(Clone, Debug)]
pub struct CompiledExpr {
    /// Original expression text
    source: String,

    /// Root of the expression tree
    root: Node,

    /// Branch names referenced by the expression, by order of first use
    pub required_branches: Vec<String>,

    /// Whether each referenced branch is used without an explicit index,
    /// and thus drives iteration over object instances
    iterated: Vec<bool>,
}
//
impl CompiledExpr {
    /// Parse an expression. An empty expression means "no cut" and always
    /// evaluates to 1.
    pub fn compile(input: &str) -> Result<Self> {
        let tokens = tokenize(input)?;
        if tokens.is_empty() {
            return Ok(Self {
                source: input.to_owned(),
                root: Node::Number(1.),
                required_branches: Vec::new(),
                iterated: Vec::new(),
            });
        }
        let mut parser = Parser {
            tokens: &tokens,
            pos: 0,
            branches: Vec::new(),
            iterated: Vec::new(),
        };
        let root = parser.parse_or()?;
        if let Some(tok) = parser.peek() {
            return Err(Error::Expression(format!(
                "unexpected {tok:?} after end of expression in '{input}'"
            )));
        }
        Ok(Self {
            source: input.to_owned(),
            root,
            required_branches: parser.branches,
            iterated: parser.iterated,
        })
    }

    /// Expression text, as it was compiled
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Resolve the referenced branches inside of a tree
    pub fn bind<'e, 't>(&'e self, tree: &'t Tree) -> Result<BoundExpr<'e, 't>> {
        let branches = self
            .required_branches
            .iter()
            .map(|name| {
                tree.branch(name).ok_or_else(|| Error::UnknownBranch {
                    tree: tree.name().to_owned(),
                    branch: name.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(BoundExpr {
            expr: self,
            branches,
        })
    }
}

/// An expression whose branches have been resolved inside of a tree
pub struct BoundExpr<'e, 't> {
    expr: &'e CompiledExpr,
    branches: Vec<&'t Branch>,
}
//
impl BoundExpr<'_, '_> {
    /// Number of object instances this expression iterates over in an entry,
    /// or None if it only involves scalars (and indexed objects)
    pub fn instance_count(&self, entry: usize) -> Option<usize> {
        self.branches
            .iter()
            .zip(&self.expr.iterated)
            .filter(|(_, iterated)| **iterated)
            .filter_map(|(branch, _)| match branch {
                Branch::Scalar(_) => None,
                Branch::Jagged(rows) => Some(rows[entry].len()),
            })
            .min()
    }

    /// Evaluate the expression for one object instance of an entry
    pub fn eval(&self, entry: usize, instance: usize) -> f64 {
        self.eval_node(&self.expr.root, entry, instance)
    }

    /// Evaluate the expression for every object instance of an entry
    pub fn eval_instances(&self, entry: usize) -> Vec<f64> {
        let count = self.instance_count(entry).unwrap_or(1);
        (0..count).map(|i| self.eval(entry, i)).collect()
    }

    fn eval_node(&self, node: &Node, entry: usize, instance: usize) -> f64 {
        let truth = |b: bool| if b { 1. } else { 0. };
        match node {
            Node::Number(x) => *x,
            Node::Branch { slot, index } => match self.branches[*slot] {
                Branch::Scalar(values) => values[entry],
                Branch::Jagged(rows) => rows[entry]
                    .get(index.unwrap_or(instance))
                    .copied()
                    .unwrap_or(0.),
            },
            Node::Neg(a) => -self.eval_node(a, entry, instance),
            Node::Not(a) => truth(self.eval_node(a, entry, instance) == 0.),
            Node::Binary(op, a, b) => {
                let lhs = self.eval_node(a, entry, instance);
                // Logical operators short-circuit like their C++ counterparts
                match op {
                    BinOp::And if lhs == 0. => return 0.,
                    BinOp::Or if lhs != 0. => return 1.,
                    _ => {}
                }
                let rhs = self.eval_node(b, entry, instance);
                match op {
                    BinOp::Add => lhs + rhs,
                    BinOp::Sub => lhs - rhs,
                    BinOp::Mul => lhs * rhs,
                    BinOp::Div => lhs / rhs,
                    BinOp::Eq => truth(lhs == rhs),
                    BinOp::Ne => truth(lhs != rhs),
                    BinOp::Lt => truth(lhs < rhs),
                    BinOp::Le => truth(lhs <= rhs),
                    BinOp::Gt => truth(lhs > rhs),
                    BinOp::Ge => truth(lhs >= rhs),
                    BinOp::And | BinOp::Or => truth(rhs != 0.),
                }
            }
            Node::Call(func, args) => {
                let arg = |i: usize| self.eval_node(&args[i], entry, instance);
                match func {
                    Func::Abs => arg(0).abs(),
                    Func::Sqrt => arg(0).sqrt(),
                    Func::Log => arg(0).ln(),
                    Func::Exp => arg(0).exp(),
                    Func::Pow => arg(0).powf(arg(1)),
                    Func::Min => arg(0).min(arg(1)),
                    Func::Max => arg(0).max(arg(1)),
                }
            }
        }
    }
}

/// Number of instances over which several expressions must be jointly
/// evaluated for a given entry
pub fn joint_instance_count(exprs: &[&BoundExpr<'_, '_>], entry: usize) -> usize {
    exprs
        .iter()
        .filter_map(|e| e.instance_count(entry))
        .min()
        .unwrap_or(1)
}

// ### TOKENIZER ###

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Num(f64),
    Ident(String),
    Op(&'static str),
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    const OPERATORS: [&str; 19] = [
        "&&", "||", "==", "!=", "<=", ">=", "<", ">", "!", "+", "-", "*", "/", "(", ")", ",", "[",
        "]", "=",
    ];

    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;
    'outer: while pos < bytes.len() {
        let c = bytes[pos] as char;
        if c.is_ascii_whitespace() {
            pos += 1;
            continue;
        }

        // Numbers, possibly in scientific notation
        if c.is_ascii_digit() || (c == '.' && bytes.get(pos + 1).map_or(false, u8::is_ascii_digit))
        {
            let start = pos;
            while pos < bytes.len() {
                let d = bytes[pos] as char;
                let exponent_sign = (d == '+' || d == '-')
                    && matches!(bytes[pos - 1] as char, 'e' | 'E')
                    && pos - 1 > start;
                if d.is_ascii_digit() || d == '.' || d == 'e' || d == 'E' || exponent_sign {
                    pos += 1;
                } else {
                    break;
                }
            }
            let text = &input[start..pos];
            let value = text
                .parse::<f64>()
                .map_err(|_| Error::Expression(format!("invalid number '{text}'")))?;
            tokens.push(Token::Num(value));
            continue;
        }

        // Branch and function names. Dots separate collection and field.
        if c.is_ascii_alphabetic() || c == '_' {
            let start = pos;
            while pos < bytes.len() {
                let d = bytes[pos] as char;
                if d.is_ascii_alphanumeric() || d == '_' || d == '.' {
                    pos += 1;
                } else {
                    break;
                }
            }
            tokens.push(Token::Ident(input[start..pos].to_owned()));
            continue;
        }

        for op in OPERATORS {
            if input[pos..].starts_with(op) {
                // A lone '=' is accepted as a synonym of '=='
                tokens.push(Token::Op(if op == "=" { "==" } else { op }));
                pos += op.len();
                continue 'outer;
            }
        }
        return Err(Error::Expression(format!(
            "unexpected character '{c}' in '{input}'"
        )));
    }
    Ok(tokens)
}

// ### PARSER ###

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    branches: Vec<String>,
    iterated: Vec<bool>,
}
//
impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    /// Consume the next token if it is the given operator
    fn eat(&mut self, op: &str) -> bool {
        if matches!(self.peek(), Some(Token::Op(o)) if *o == op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, op: &str) -> Result<()> {
        if self.eat(op) {
            Ok(())
        } else {
            Err(Error::Expression(format!(
                "expected '{op}', found {:?}",
                self.peek()
            )))
        }
    }

    fn slot(&mut self, name: &str, indexed: bool) -> usize {
        let slot = match self.branches.iter().position(|b| b == name) {
            Some(slot) => slot,
            None => {
                self.branches.push(name.to_owned());
                self.iterated.push(false);
                self.branches.len() - 1
            }
        };
        self.iterated[slot] |= !indexed;
        slot
    }

    fn parse_or(&mut self) -> Result<Node> {
        let mut lhs = self.parse_and()?;
        while self.eat("||") {
            let rhs = self.parse_and()?;
            lhs = Node::Binary(BinOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Node> {
        let mut lhs = self.parse_cmp()?;
        while self.eat("&&") {
            let rhs = self.parse_cmp()?;
            lhs = Node::Binary(BinOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_cmp(&mut self) -> Result<Node> {
        let lhs = self.parse_sum()?;
        let op = match self.peek() {
            Some(Token::Op("==")) => BinOp::Eq,
            Some(Token::Op("!=")) => BinOp::Ne,
            Some(Token::Op("<")) => BinOp::Lt,
            Some(Token::Op("<=")) => BinOp::Le,
            Some(Token::Op(">")) => BinOp::Gt,
            Some(Token::Op(">=")) => BinOp::Ge,
            _ => return Ok(lhs),
        };
        self.pos += 1;
        let rhs = self.parse_sum()?;
        Ok(Node::Binary(op, Box::new(lhs), Box::new(rhs)))
    }

    fn parse_sum(&mut self) -> Result<Node> {
        let mut lhs = self.parse_product()?;
        loop {
            let op = if self.eat("+") {
                BinOp::Add
            } else if self.eat("-") {
                BinOp::Sub
            } else {
                return Ok(lhs);
            };
            let rhs = self.parse_product()?;
            lhs = Node::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn parse_product(&mut self) -> Result<Node> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = if self.eat("*") {
                BinOp::Mul
            } else if self.eat("/") {
                BinOp::Div
            } else {
                return Ok(lhs);
            };
            let rhs = self.parse_unary()?;
            lhs = Node::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn parse_unary(&mut self) -> Result<Node> {
        if self.eat("-") {
            Ok(Node::Neg(Box::new(self.parse_unary()?)))
        } else if self.eat("!") {
            Ok(Node::Not(Box::new(self.parse_unary()?)))
        } else if self.eat("+") {
            self.parse_unary()
        } else {
            self.parse_atom()
        }
    }

    fn parse_atom(&mut self) -> Result<Node> {
        match self.next() {
            Some(Token::Num(x)) => Ok(Node::Number(x)),
            Some(Token::Op("(")) => {
                let inner = self.parse_or()?;
                self.expect(")")?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => {
                if self.eat("(") {
                    let func = Func::from_name(&name)
                        .ok_or_else(|| Error::Expression(format!("unknown function '{name}'")))?;
                    let mut args = vec![self.parse_or()?];
                    while self.eat(",") {
                        args.push(self.parse_or()?);
                    }
                    self.expect(")")?;
                    if args.len() != func.arity() {
                        return Err(Error::Expression(format!(
                            "{name}() takes {} argument(s), {} given",
                            func.arity(),
                            args.len()
                        )));
                    }
                    Ok(Node::Call(func, args))
                } else if self.eat("[") {
                    let index = match self.next() {
                        Some(Token::Num(x)) if x >= 0. && x.fract() == 0. => x as usize,
                        other => {
                            return Err(Error::Expression(format!(
                                "invalid index {other:?} for '{name}'"
                            )))
                        }
                    };
                    self.expect("]")?;
                    Ok(Node::Branch {
                        slot: self.slot(&name, true),
                        index: Some(index),
                    })
                } else {
                    Ok(Node::Branch {
                        slot: self.slot(&name, false),
                        index: None,
                    })
                }
            }
            other => Err(Error::Expression(format!(
                "expected a number, a name or '(', found {other:?}"
            ))),
        }
    }
}
