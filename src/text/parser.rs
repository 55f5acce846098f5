//! `.rg` parser.
//!
//! Lines are tokenized independently. Each routine is parsed in two passes
//! over its body: the first creates the blocks in label order so ordinals
//! follow the text, the second fills statements and edges and may refer to
//! any label of the routine.

use hashbrown::HashMap;
use log::trace;

use super::ParseError;
use crate::coerce::{Repr, TypeHint};
use crate::ir::{
    BinaryOp, BlockId, CatchHandler, Edge, Expr, ExprKind, GraphBuilder, RoutineGraph,
    Span, Stmt, StmtKind, SwitchCase, VarId,
};

/// Parse every routine in `text`.
pub fn parse_routines(text: &str) -> Result<Vec<RoutineGraph>, ParseError> {
    let mut lines = Vec::new();
    for (index, src) in text.lines().enumerate() {
        let line = lex(index + 1, src)?;
        if !line.tokens.is_empty() {
            lines.push(line);
        }
    }

    let mut routines = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        let header = &lines[i];
        if !matches!(header.tokens.first(), Some(Token { tok: Tok::Ident(w), .. }) if w == "routine") {
            return Err(ParseError::new(header.number, "expected 'routine'"));
        }
        let close = lines[i + 1..]
            .iter()
            .position(Line::is_close)
            .map(|p| p + i + 1)
            .ok_or_else(|| ParseError::new(header.number, "routine is not closed by '}'"))?;
        let graph = RoutineParser::parse(header, &lines[i + 1..close])?;
        trace!("parsed routine {} with {} block(s)", graph.name, graph.len());
        routines.push(graph);
        i = close + 1;
    }
    Ok(routines)
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Var(String),
    Int(i64),
    Double(f64),
    Str(String),
    Sym(&'static str),
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    column: u32,
}

#[derive(Debug)]
struct Line {
    number: usize,
    tokens: Vec<Token>,
}

impl Line {
    fn is_close(&self) -> bool {
        matches!(self.tokens.as_slice(), [Token { tok: Tok::Sym("}"), .. }])
    }

    /// `name:` or `name: dead`.
    fn label(&self) -> Option<(&str, bool)> {
        match self.tokens.as_slice() {
            [Token { tok: Tok::Ident(name), .. }, Token { tok: Tok::Sym(":"), .. }] => {
                Some((name.as_str(), false))
            }
            [Token { tok: Tok::Ident(name), .. }, Token { tok: Tok::Sym(":"), .. }, Token { tok: Tok::Ident(dead), .. }]
                if dead == "dead" =>
            {
                Some((name.as_str(), true))
            }
            _ => None,
        }
    }
}

const SYMBOLS: [&str; 12] = [".=", "->", ",", "(", ")", ":", "=", "{", "}", "|", "<", ">"];

fn lex(number: usize, src: &str) -> Result<Line, ParseError> {
    let chars: Vec<char> = src.chars().collect();
    let word = |from: usize, to: usize| chars[from..to].iter().collect::<String>();
    let is_word = |c: char| c.is_alphanumeric() || c == '_';
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let column = i as u32 + 1;
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == ';' {
            break;
        }

        let tok = if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && is_word(chars[i]) {
                i += 1;
            }
            Tok::Ident(word(start, i))
        } else if c == '%' {
            let start = i + 1;
            i = start;
            while i < chars.len() && is_word(chars[i]) {
                i += 1;
            }
            if i == start {
                return Err(ParseError::new(number, "expected a variable name after '%'"));
            }
            Tok::Var(word(start, i))
        } else if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(char::is_ascii_digit)) {
            let start = i;
            i += 1;
            let digits = |mut i: usize| {
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                i
            };
            i = digits(i);
            let mut floating = false;
            if chars.get(i) == Some(&'.') && chars.get(i + 1).is_some_and(char::is_ascii_digit) {
                floating = true;
                i = digits(i + 1);
            }
            if matches!(chars.get(i), Some('e' | 'E')) {
                let mut exp = i + 1;
                if matches!(chars.get(exp), Some('+' | '-')) {
                    exp += 1;
                }
                let end = digits(exp);
                if end > exp {
                    floating = true;
                    i = end;
                }
            }
            let text = word(start, i);
            if floating {
                Tok::Double(text.parse().map_err(|_| {
                    ParseError::new(number, format!("invalid number '{}'", text))
                })?)
            } else {
                Tok::Int(text.parse().map_err(|_| {
                    ParseError::new(number, format!("integer '{}' out of range", text))
                })?)
            }
        } else if c == '"' {
            let mut value = String::new();
            i += 1;
            loop {
                match chars.get(i) {
                    None => return Err(ParseError::new(number, "unterminated string literal")),
                    Some('"') => break,
                    Some('\\') => {
                        let escaped = match chars.get(i + 1) {
                            Some('n') => '\n',
                            Some('t') => '\t',
                            Some('"') => '"',
                            Some('\\') => '\\',
                            other => {
                                return Err(ParseError::new(
                                    number,
                                    format!("unknown escape {:?}", other),
                                ))
                            }
                        };
                        value.push(escaped);
                        i += 2;
                    }
                    Some(other) => {
                        value.push(*other);
                        i += 1;
                    }
                }
            }
            i += 1;
            Tok::Str(value)
        } else {
            let rest = word(i, (i + 2).min(chars.len()));
            let sym = SYMBOLS
                .iter()
                .find(|sym| rest.starts_with(**sym))
                .ok_or_else(|| ParseError::new(number, format!("unexpected character '{}'", c)))?;
            i += sym.len();
            Tok::Sym(*sym)
        };
        tokens.push(Token { tok, column });
    }

    Ok(Line { number, tokens })
}

struct Cursor<'t> {
    tokens: &'t [Token],
    pos: usize,
    line: usize,
}

impl<'t> Cursor<'t> {
    fn new(line: &'t Line) -> Self {
        Self { tokens: &line.tokens, pos: 0, line: line.number }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::new(self.line, message)
    }

    fn peek(&self) -> Option<&'t Tok> {
        self.tokens.get(self.pos).map(|t| &t.tok)
    }

    fn next(&mut self) -> Option<&'t Tok> {
        let tok = self.peek();
        self.pos += 1;
        tok
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn finish(&self) -> Result<(), ParseError> {
        match self.peek() {
            None => Ok(()),
            Some(tok) => Err(self.error(format!("unexpected trailing {}", describe(tok)))),
        }
    }

    fn eat_sym(&mut self, sym: &str) -> bool {
        if matches!(self.peek(), Some(Tok::Sym(s)) if *s == sym) {
            self.pos += 1;
            return true;
        }
        false
    }

    fn expect_sym(&mut self, sym: &str) -> Result<(), ParseError> {
        if self.eat_sym(sym) {
            return Ok(());
        }
        Err(self.error(format!("expected '{}' but found {}", sym, self.found())))
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if matches!(self.peek(), Some(Tok::Ident(w)) if w == keyword) {
            self.pos += 1;
            return true;
        }
        false
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<(), ParseError> {
        if self.eat_keyword(keyword) {
            return Ok(());
        }
        Err(self.error(format!("expected '{}' but found {}", keyword, self.found())))
    }

    fn ident(&mut self, what: &str) -> Result<&'t str, ParseError> {
        match self.peek() {
            Some(Tok::Ident(w)) => {
                self.pos += 1;
                Ok(w)
            }
            _ => Err(self.error(format!("expected {} but found {}", what, self.found()))),
        }
    }

    fn var(&mut self) -> Result<&'t str, ParseError> {
        match self.peek() {
            Some(Tok::Var(name)) => {
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.error(format!("expected a variable but found {}", self.found()))),
        }
    }

    fn found(&self) -> String {
        self.peek().map_or_else(|| "end of line".to_string(), describe)
    }
}

fn describe(tok: &Tok) -> String {
    match tok {
        Tok::Ident(w) => format!("'{}'", w),
        Tok::Var(v) => format!("'%{}'", v),
        Tok::Int(v) => format!("'{}'", v),
        Tok::Double(v) => format!("'{}'", v),
        Tok::Str(s) => format!("{:?}", s),
        Tok::Sym(s) => format!("'{}'", s),
    }
}

fn binary_op(word: &str) -> Option<BinaryOp> {
    Some(match word {
        "add" => BinaryOp::Add,
        "sub" => BinaryOp::Sub,
        "mul" => BinaryOp::Mul,
        "concat" => BinaryOp::Concat,
        "eq" => BinaryOp::Eq,
        "lt" => BinaryOp::Lt,
        _ => return None,
    })
}

fn parse_hint(cur: &mut Cursor<'_>) -> Result<TypeHint, ParseError> {
    let mut text = cur.ident("a type hint")?.to_string();
    while cur.eat_sym("|") {
        text.push('|');
        text.push_str(cur.ident("a type hint")?);
    }
    TypeHint::parse(&text).ok_or_else(|| cur.error(format!("unknown type hint '{}'", text)))
}

struct RoutineParser {
    builder: GraphBuilder,
    blocks: HashMap<String, BlockId>,
    vars: HashMap<String, VarId>,
}

impl RoutineParser {
    fn parse(header: &Line, body: &[Line]) -> Result<RoutineGraph, ParseError> {
        let mut cur = Cursor::new(header);
        cur.expect_keyword("routine")?;
        let name = cur.ident("a routine name")?;
        let mut parser = RoutineParser {
            builder: GraphBuilder::new(name),
            blocks: HashMap::new(),
            vars: HashMap::new(),
        };

        cur.expect_sym("(")?;
        if !cur.eat_sym(")") {
            loop {
                let (name, repr, hint) = parser.declaration(&mut cur)?;
                let id = parser.builder.param(name, repr, hint);
                parser.define(&cur, name, id)?;
                if cur.eat_sym(")") {
                    break;
                }
                cur.expect_sym(",")?;
            }
        }
        cur.expect_sym("{")?;
        cur.finish()?;

        for line in body {
            if let Some((label, _)) = line.label() {
                if parser.blocks.contains_key(label) {
                    return Err(ParseError::new(line.number, format!("duplicate block '{}'", label)));
                }
                let id = parser.builder.block(label);
                parser.blocks.insert(label.to_string(), id);
            }
        }
        if parser.blocks.is_empty() {
            return Err(ParseError::new(header.number, format!("routine '{}' has no blocks", name)));
        }

        let mut current: Option<(BlockId, bool)> = None;
        for line in body {
            if let Some((label, dead)) = line.label() {
                let id = parser.blocks[label];
                if dead {
                    parser.builder.mark_dead(id);
                }
                current = Some((id, false));
                continue;
            }

            let mut cur = Cursor::new(line);
            if cur.eat_keyword("var") || cur.eat_keyword("global") {
                let global = matches!(line.tokens.first(), Some(Token { tok: Tok::Ident(w), .. }) if w == "global");
                let (name, repr, hint) = parser.declaration(&mut cur)?;
                cur.finish()?;
                let id = if global {
                    parser.builder.global(name, repr, hint)
                } else {
                    parser.builder.local(name, repr, hint)
                };
                parser.define(&cur, name, id)?;
                continue;
            }

            let Some((block, terminated)) = current.as_mut() else {
                return Err(cur.error("statement outside of a block"));
            };
            if *terminated {
                return Err(cur.error("statement after the block's terminator"));
            }
            let column = line.tokens.first().map_or(1, |t| t.column);
            let span = Span { line: line.number as u32, column };
            match parser.line(&mut cur)? {
                Parsed::Stmt(kind) => parser.builder.push(*block, Stmt::at(kind, span)),
                Parsed::Edge(edge) => {
                    parser.builder.set_edge(*block, edge);
                    *terminated = true;
                }
            }
            cur.finish()?;
        }

        Ok(parser.builder.finish())
    }

    fn define(&mut self, cur: &Cursor<'_>, name: &str, id: VarId) -> Result<(), ParseError> {
        if self.vars.insert(name.to_string(), id).is_some() {
            return Err(cur.error(format!("variable '%{}' declared twice", name)));
        }
        Ok(())
    }

    /// `%name: repr [hint h]`
    fn declaration<'t>(
        &mut self,
        cur: &mut Cursor<'t>,
    ) -> Result<(&'t str, Repr, TypeHint), ParseError> {
        let name = cur.var()?;
        cur.expect_sym(":")?;
        let repr = self.repr(cur)?;
        let hint = if cur.eat_keyword("hint") { parse_hint(cur)? } else { repr.hint() };
        Ok((name, repr, hint))
    }

    fn repr(&mut self, cur: &mut Cursor<'_>) -> Result<Repr, ParseError> {
        let word = cur.ident("a representation")?;
        Ok(match word {
            "bool" => Repr::Bool,
            "int32" => Repr::Int32,
            "int64" => Repr::Int64,
            "double" => Repr::Double,
            "string" => Repr::String,
            "mstring" => Repr::MutableString,
            "number" => Repr::Number,
            "array" => Repr::Array,
            "value" => Repr::Value,
            "alias" => Repr::Alias,
            "object" => {
                if cur.eat_sym("<") {
                    let class = cur.ident("a class name")?;
                    cur.expect_sym(">")?;
                    Repr::Object(Some(self.builder.class(class)))
                } else {
                    Repr::Object(None)
                }
            }
            other => return Err(cur.error(format!("unknown representation '{}'", other))),
        })
    }

    fn var_id(&self, cur: &Cursor<'_>, name: &str) -> Result<VarId, ParseError> {
        self.vars
            .get(name)
            .copied()
            .ok_or_else(|| cur.error(format!("undeclared variable '%{}'", name)))
    }

    fn block(&self, cur: &mut Cursor<'_>) -> Result<BlockId, ParseError> {
        let name = cur.ident("a block label")?;
        self.blocks
            .get(name)
            .copied()
            .ok_or_else(|| cur.error(format!("unknown block '{}'", name)))
    }

    fn line(&mut self, cur: &mut Cursor<'_>) -> Result<Parsed, ParseError> {
        if let Some(Tok::Var(name)) = cur.peek() {
            cur.next();
            let var = self.var_id(cur, name)?;
            if cur.eat_sym(".=") {
                return Ok(Parsed::Stmt(StmtKind::Append(var, self.expr(cur)?)));
            }
            cur.expect_sym("=")?;
            return Ok(Parsed::Stmt(StmtKind::Assign(var, self.expr(cur)?)));
        }

        let keyword = cur.ident("a statement")?;
        let parsed = match keyword {
            "echo" => Parsed::Stmt(StmtKind::Echo(self.expr(cur)?)),
            "eval" => Parsed::Stmt(StmtKind::Eval(self.expr(cur)?)),
            "throw" => Parsed::Stmt(StmtKind::Throw(self.expr(cur)?)),
            "return" => {
                let value = if cur.at_end() { None } else { Some(self.expr(cur)?) };
                Parsed::Stmt(StmtKind::Return(value))
            }
            "goto" => Parsed::Edge(Edge::Simple { target: self.block(cur)? }),
            "if" => {
                let condition = self.expr(cur)?;
                cur.expect_keyword("then")?;
                let if_true = self.block(cur)?;
                cur.expect_keyword("else")?;
                let if_false = self.block(cur)?;
                Parsed::Edge(Edge::Conditional { condition, if_true, if_false })
            }
            "try" => self.try_edge(cur)?,
            "foreach" => {
                let enumeree = self.expr(cur)?;
                cur.expect_sym("->")?;
                Parsed::Edge(Edge::ForeachEnumeree { enumeree, move_next: self.block(cur)? })
            }
            "movenext" => {
                let enumeree = self.block(cur)?;
                let name = cur.var()?;
                let value = self.var_id(cur, name)?;
                let key = match cur.peek() {
                    Some(Tok::Var(name)) => {
                        cur.next();
                        Some(self.var_id(cur, name)?)
                    }
                    _ => None,
                };
                cur.expect_keyword("body")?;
                let body = self.block(cur)?;
                cur.expect_keyword("after")?;
                let after = self.block(cur)?;
                Parsed::Edge(Edge::ForeachMoveNext { enumeree, value, key, body, after })
            }
            "switch" => {
                let value = self.expr(cur)?;
                let mut cases = Vec::new();
                while cur.eat_keyword("case") {
                    let expr = self.expr(cur)?;
                    let ExprKind::Literal(literal) = expr.kind else {
                        return Err(cur.error("switch cases must be literals"));
                    };
                    cur.expect_sym("->")?;
                    cases.push(SwitchCase { value: literal, target: self.block(cur)? });
                }
                cur.expect_keyword("default")?;
                cur.expect_sym("->")?;
                Parsed::Edge(Edge::Switch { value, cases, default: self.block(cur)? })
            }
            other => return Err(cur.error(format!("unknown statement '{}'", other))),
        };
        Ok(parsed)
    }

    fn try_edge(&mut self, cur: &mut Cursor<'_>) -> Result<Parsed, ParseError> {
        let body = self.block(cur)?;
        let mut handlers = Vec::new();
        while cur.eat_keyword("catch") {
            let class = cur.ident("a class name")?;
            let class = self.builder.class(class);
            let var = match cur.peek() {
                Some(Tok::Var(name)) => {
                    cur.next();
                    Some(self.var_id(cur, name)?)
                }
                _ => None,
            };
            cur.expect_sym("->")?;
            handlers.push(CatchHandler { class, var, target: self.block(cur)? });
        }
        let finally = if cur.eat_keyword("finally") { Some(self.block(cur)?) } else { None };
        cur.expect_keyword("end")?;
        let next = self.block(cur)?;
        Ok(Parsed::Edge(Edge::TryCatch { body, handlers, finally, next }))
    }

    fn expr(&mut self, cur: &mut Cursor<'_>) -> Result<Expr, ParseError> {
        let Some(tok) = cur.next() else {
            return Err(cur.error("expected an expression but found end of line"));
        };
        let expr = match tok {
            Tok::Int(v) => Expr::int(*v),
            Tok::Double(v) => Expr::double(*v),
            Tok::Str(s) => Expr::string(s),
            Tok::Var(name) => {
                let id = self.var_id(cur, name)?;
                self.builder.var(id)
            }
            Tok::Sym("(") => {
                let inner = self.expr(cur)?;
                let inner = if cur.eat_sym(":") { inner.with_hint(parse_hint(cur)?) } else { inner };
                cur.expect_sym(")")?;
                inner
            }
            Tok::Ident(word) => match word.as_str() {
                "null" => Expr::null(),
                "true" => Expr::bool(true),
                "false" => Expr::bool(false),
                "new" => {
                    let class = cur.ident("a class name")?;
                    Expr::new_object(self.builder.class(class))
                }
                "not" => Expr::not(self.expr(cur)?),
                "array" => {
                    cur.expect_sym("(")?;
                    let mut items = Vec::new();
                    if !cur.eat_sym(")") {
                        loop {
                            items.push(self.expr(cur)?);
                            if cur.eat_sym(")") {
                                break;
                            }
                            cur.expect_sym(",")?;
                        }
                    }
                    Expr::array(items)
                }
                other => {
                    let op = binary_op(other)
                        .ok_or_else(|| cur.error(format!("unknown expression '{}'", other)))?;
                    let left = self.expr(cur)?;
                    cur.expect_sym(",")?;
                    let right = self.expr(cur)?;
                    Expr::binary(op, left, right)
                }
            },
            other => return Err(cur.error(format!("expected an expression but found {}", describe(other)))),
        };
        Ok(expr)
    }
}

enum Parsed {
    Stmt(StmtKind),
    Edge(Edge),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Literal, VarStorage};

    fn literal_of(expr: &Expr) -> Option<&Literal> {
        match &expr.kind {
            ExprKind::Literal(literal) => Some(literal),
            _ => None,
        }
    }

    const LOOP: &str = r#"
; counts to %n
routine count(%n: value hint int64|double) {
  var %i: int64
  global %out: mstring
entry:
  %i = 0
  goto head
head:
  if lt %i, %n then body else done
body:
  %out .= concat "x", %i
  %i = add %i, 1
  goto head
done:
  return %i
}
"#;

    #[test]
    fn test_parse_loop() {
        let routines = parse_routines(LOOP).unwrap();
        assert_eq!(routines.len(), 1);
        let graph = &routines[0];
        assert_eq!(graph.name, "count");
        assert_eq!(graph.len(), 4);
        assert_eq!(graph.block_by_name("done"), Some(BlockId(3)));
        assert_eq!(graph.variables[0].hint, TypeHint::NUMBER);
        assert_eq!(graph.variables[0].storage, VarStorage::Param(0));
        assert_eq!(graph.variables[2].storage, VarStorage::Global);

        let body = graph.block(BlockId(2)).unwrap();
        assert_eq!(body.statements.len(), 2);
        assert_eq!(body.statements[0].span, Some(Span { line: 12, column: 3 }));
        assert_eq!(body.edge, Some(Edge::Simple { target: BlockId(1) }));
    }

    #[test]
    fn test_parse_try_and_switch() {
        let text = r#"
routine f(%x: int64) {
  var %e: object<Error>
entry:
  try body catch Error %e -> handler finally fin end next
body:
  switch %x case 1 -> next case 2 -> next default -> next
handler:
  echo "caught"
fin:
  eval (%x : int64|null)
next: dead
  return
}
"#;
        let graph = parse_routines(text).unwrap().remove(0);
        let entry = graph.block(BlockId(0)).unwrap();
        let Some(Edge::TryCatch { handlers, finally, next, .. }) = &entry.edge else {
            panic!("expected a try edge, got {:?}", entry.edge);
        };
        assert_eq!(handlers.len(), 1);
        assert_eq!(graph.class_name(handlers[0].class), Some("Error"));
        assert_eq!(*finally, Some(BlockId(3)));
        assert_eq!(*next, BlockId(4));
        assert!(graph.block(BlockId(4)).unwrap().dead);

        let fin = graph.block(BlockId(3)).unwrap();
        let StmtKind::Eval(expr) = &fin.statements[0].kind else { panic!() };
        assert_eq!(expr.hint, TypeHint::INT64.union(TypeHint::NULL));
    }

    #[test]
    fn test_foreach_and_literals() {
        let text = r#"
routine g() {
  var %v: value
  var %k: value
entry:
  foreach array(1, -2.5, "a\"b", null, true) -> head
head:
  movenext entry %v %k body body after done
body:
  echo %v
  goto head
done:
}
"#;
        let graph = parse_routines(text).unwrap().remove(0);
        let Some(Edge::ForeachEnumeree { enumeree, .. }) = &graph.block(BlockId(0)).unwrap().edge else {
            panic!()
        };
        let ExprKind::NewArray(items) = &enumeree.kind else { panic!() };
        assert_eq!(literal_of(&items[1]), Some(&Literal::Double(-2.5)));
        assert_eq!(literal_of(&items[2]), Some(&Literal::String("a\"b".into())));
        let Some(Edge::ForeachMoveNext { key, .. }) = &graph.block(BlockId(1)).unwrap().edge else {
            panic!()
        };
        assert!(key.is_some());
    }

    #[test]
    fn test_errors_carry_line_numbers() {
        let err = parse_routines("routine f() {\nentry:\n  goto nowhere\n}\n").unwrap_err();
        assert_eq!(err.line, 3);
        assert!(err.message.contains("unknown block"));

        let err = parse_routines("routine f() {\nentry:\n  echo %y\n}\n").unwrap_err();
        assert!(err.message.contains("undeclared variable"));

        let err = parse_routines("routine f() {\nentry:\n  goto entry\n  echo 1\n}\n").unwrap_err();
        assert_eq!(err.line, 4);

        let err = parse_routines("routine f() {\nentry:\n").unwrap_err();
        assert_eq!(err.line, 1);
    }
}
