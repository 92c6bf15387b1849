//! # parser 模块说明
//!
//! ## 核心意图（Why）
//! - 解析推导器产出的 IDL 文本，使其他组件可以只凭文本重建 [`Proto`]；
//! - 只覆盖契约推导需要的子集：`syntax`、`import`、`package`、`option`、顶层 `message`/`enum`、
//!   `service` 与一元 `rpc`。
//!
//! ## 行为约束（What）
//! - `//@...` 注释作为注解附着到下一个消息、枚举或 rpc，其余注释忽略；
//! - 嵌套声明、`oneof`、流式 rpc 返回 [`ProtoError::Parse`]；`option`、`reserved` 与字段选项被跳过；
//! - 解析完成后统一解析类型引用并执行 [`Proto::validate`]，引用不存在的类型返回 [`ProtoError::UnknownType`]。
//!
//! ## 实现策略（How）
//! - 先词法切分为带行号的记号序列，再以递归下降方式消费；类型引用先记录为原始名称，全部定义读取完毕后第二遍解析，
//!   允许前向引用与自引用。

use crate::error::{ProtoError, Result};

use super::{
    ANY_TYPE, Definition, EMPTY_TYPE, EnumDef, FieldDef, FieldType, MessageDef, Proto, RpcDef,
    ScalarType, ServiceDef,
};

/// 解析 IDL 文本。
pub fn parse(text: &str) -> Result<Proto> {
    let tokens = tokenize(text)?;
    let raw = Parser::new(tokens).parse_file()?;
    raw.resolve()
}

#[derive(Clone, Debug, PartialEq)]
enum TokenKind {
    Ident(String),
    Int(i64),
    Str(String),
    Symbol(char),
    Annotation(String),
}

#[derive(Clone, Debug)]
struct Token {
    kind: TokenKind,
    line: usize,
}

fn parse_error(line: usize, detail: impl Into<String>) -> ProtoError {
    ProtoError::Parse {
        line,
        detail: detail.into(),
    }
}

fn tokenize(text: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();
    let mut line = 1;

    while let Some(c) = chars.next() {
        match c {
            '\n' => line += 1,
            c if c.is_whitespace() => {}
            '/' => match chars.next() {
                Some('/') => {
                    let mut comment = String::new();
                    while let Some(&next) = chars.peek() {
                        if next == '\n' {
                            break;
                        }
                        comment.push(next);
                        chars.next();
                    }
                    if comment.starts_with('@') {
                        tokens.push(Token {
                            kind: TokenKind::Annotation(comment.trim_end().to_owned()),
                            line,
                        });
                    }
                }
                Some('*') => {
                    let start = line;
                    let mut previous = '\0';
                    let mut closed = false;
                    for next in chars.by_ref() {
                        if next == '\n' {
                            line += 1;
                        }
                        if previous == '*' && next == '/' {
                            closed = true;
                            break;
                        }
                        previous = next;
                    }
                    if !closed {
                        return Err(parse_error(start, "unterminated block comment"));
                    }
                }
                _ => return Err(parse_error(line, "unexpected `/`")),
            },
            '"' | '\'' => {
                let mut value = String::new();
                let mut closed = false;
                while let Some(next) = chars.next() {
                    match next {
                        '\\' => match chars.next() {
                            Some('n') => value.push('\n'),
                            Some('t') => value.push('\t'),
                            Some(escaped) => value.push(escaped),
                            None => break,
                        },
                        '\n' => break,
                        quote if quote == c => {
                            closed = true;
                            break;
                        }
                        other => value.push(other),
                    }
                }
                if !closed {
                    return Err(parse_error(line, "unterminated string literal"));
                }
                tokens.push(Token {
                    kind: TokenKind::Str(value),
                    line,
                });
            }
            c if c.is_ascii_digit() || (c == '-' && chars.peek().is_some_and(char::is_ascii_digit)) => {
                let mut digits = String::from(c);
                while let Some(&next) = chars.peek() {
                    if !next.is_ascii_alphanumeric() {
                        break;
                    }
                    digits.push(next);
                    chars.next();
                }
                let value = parse_int(&digits)
                    .ok_or_else(|| parse_error(line, format!("invalid integer `{digits}`")))?;
                tokens.push(Token {
                    kind: TokenKind::Int(value),
                    line,
                });
            }
            c if c.is_ascii_alphabetic() || c == '_' || c == '.' => {
                let mut ident = String::from(c);
                while let Some(&next) = chars.peek() {
                    if !(next.is_ascii_alphanumeric() || next == '_' || next == '.') {
                        break;
                    }
                    ident.push(next);
                    chars.next();
                }
                tokens.push(Token {
                    kind: TokenKind::Ident(ident),
                    line,
                });
            }
            '{' | '}' | '(' | ')' | '[' | ']' | '<' | '>' | ';' | '=' | ',' => tokens.push(Token {
                kind: TokenKind::Symbol(c),
                line,
            }),
            other => return Err(parse_error(line, format!("unexpected character `{other}`"))),
        }
    }
    Ok(tokens)
}

fn parse_int(digits: &str) -> Option<i64> {
    let (negative, body) = match digits.strip_prefix('-') {
        Some(body) => (true, body),
        None => (false, digits),
    };
    let value = match body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        Some(hex) => i64::from_str_radix(hex, 16).ok()?,
        None => body.parse::<i64>().ok()?,
    };
    Some(if negative { -value } else { value })
}

#[derive(Debug)]
enum RawType {
    Named(String),
    Map(String, String),
}

#[derive(Debug)]
struct RawField {
    name: String,
    tag: u32,
    repeated: bool,
    ty: RawType,
    line: usize,
}

#[derive(Debug)]
struct RawMessage {
    name: String,
    annotations: Vec<String>,
    fields: Vec<RawField>,
}

#[derive(Debug)]
enum RawDefinition {
    Message(RawMessage),
    Enum(EnumDef),
}

#[derive(Debug, Default)]
struct RawProto {
    syntax: Option<String>,
    package: Option<String>,
    imports: Vec<String>,
    definitions: Vec<RawDefinition>,
    services: Vec<ServiceDef>,
}

struct Parser {
    tokens: Vec<Token>,
    position: usize,
    annotations: Vec<String>,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            position: 0,
            annotations: Vec::new(),
        }
    }

    fn parse_file(mut self) -> Result<RawProto> {
        let mut raw = RawProto::default();
        while let Some(token) = self.next_significant() {
            let line = token.line;
            match token.kind {
                TokenKind::Ident(keyword) => match keyword.as_str() {
                    "syntax" => {
                        self.expect_symbol('=')?;
                        let syntax = self.expect_str()?;
                        if syntax != "proto3" && syntax != "proto2" {
                            return Err(parse_error(line, format!("unsupported syntax `{syntax}`")));
                        }
                        self.expect_symbol(';')?;
                        raw.syntax = Some(syntax);
                    }
                    "import" => {
                        if matches!(self.peek_ident(), Some("public" | "weak")) {
                            self.position += 1;
                        }
                        raw.imports.push(self.expect_str()?);
                        self.expect_symbol(';')?;
                    }
                    "package" => {
                        raw.package = Some(self.expect_ident()?);
                        self.expect_symbol(';')?;
                    }
                    "option" => self.skip_statement()?,
                    "message" => {
                        let message = self.parse_message()?;
                        raw.definitions.push(RawDefinition::Message(message));
                    }
                    "enum" => {
                        let enumeration = self.parse_enum()?;
                        raw.definitions.push(RawDefinition::Enum(enumeration));
                    }
                    "service" => {
                        let service = self.parse_service()?;
                        raw.services.push(service);
                    }
                    other => {
                        return Err(parse_error(line, format!("unexpected keyword `{other}`")));
                    }
                },
                TokenKind::Symbol(';') => {}
                other => return Err(parse_error(line, format!("unexpected token {other:?}"))),
            }
        }
        Ok(raw)
    }

    fn parse_message(&mut self) -> Result<RawMessage> {
        let annotations = std::mem::take(&mut self.annotations);
        let name = self.expect_ident()?;
        self.expect_symbol('{')?;
        let mut fields = Vec::new();
        loop {
            let token = self.expect_next()?;
            let line = token.line;
            match token.kind {
                TokenKind::Symbol('}') => break,
                TokenKind::Symbol(';') => {}
                TokenKind::Annotation(_) => {}
                TokenKind::Ident(word) => match word.as_str() {
                    "option" | "reserved" | "extensions" => self.skip_statement()?,
                    "message" | "enum" | "oneof" | "extend" | "group" => {
                        return Err(parse_error(
                            line,
                            format!("`{word}` inside message `{name}` is not supported"),
                        ));
                    }
                    "repeated" => {
                        let ty = self.expect_ident()?;
                        fields.push(self.parse_field(line, true, ty)?);
                    }
                    "optional" | "required" => {
                        let ty = self.expect_ident()?;
                        fields.push(self.parse_field(line, false, ty)?);
                    }
                    _ => fields.push(self.parse_field(line, false, word)?),
                },
                other => return Err(parse_error(line, format!("unexpected token {other:?}"))),
            }
        }
        Ok(RawMessage {
            name,
            annotations,
            fields,
        })
    }

    fn parse_field(&mut self, line: usize, repeated: bool, ty: String) -> Result<RawField> {
        let ty = if ty == "map" {
            self.expect_symbol('<')?;
            let key = self.expect_ident()?;
            self.expect_symbol(',')?;
            let value = self.expect_ident()?;
            self.expect_symbol('>')?;
            RawType::Map(key, value)
        } else {
            RawType::Named(ty)
        };
        let name = self.expect_ident()?;
        self.expect_symbol('=')?;
        let tag = self.expect_int()?;
        let tag = u32::try_from(tag)
            .map_err(|_| parse_error(line, format!("field `{name}` has invalid tag {tag}")))?;
        self.skip_options()?;
        self.expect_symbol(';')?;
        Ok(RawField {
            name,
            tag,
            repeated,
            ty,
            line,
        })
    }

    fn parse_enum(&mut self) -> Result<EnumDef> {
        let annotations = std::mem::take(&mut self.annotations);
        let name = self.expect_ident()?;
        self.expect_symbol('{')?;
        let mut values = Vec::new();
        loop {
            let token = self.expect_next()?;
            let line = token.line;
            match token.kind {
                TokenKind::Symbol('}') => break,
                TokenKind::Symbol(';') | TokenKind::Annotation(_) => {}
                TokenKind::Ident(word) if word == "option" || word == "reserved" => {
                    self.skip_statement()?;
                }
                TokenKind::Ident(value) => {
                    self.expect_symbol('=')?;
                    let ordinal = self.expect_int()?;
                    if usize::try_from(ordinal).ok() != Some(values.len()) {
                        return Err(parse_error(
                            line,
                            format!(
                                "enum `{name}` value `{value}` must have ordinal {}",
                                values.len()
                            ),
                        ));
                    }
                    self.skip_options()?;
                    self.expect_symbol(';')?;
                    values.push(value);
                }
                other => return Err(parse_error(line, format!("unexpected token {other:?}"))),
            }
        }
        Ok(EnumDef {
            name,
            annotations,
            values,
        })
    }

    fn parse_service(&mut self) -> Result<ServiceDef> {
        self.annotations.clear();
        let name = self.expect_ident()?;
        self.expect_symbol('{')?;
        let mut rpcs = Vec::new();
        loop {
            let Some(token) = self.next_significant() else {
                return Err(parse_error(self.last_line(), format!("service `{name}` not closed")));
            };
            let line = token.line;
            match token.kind {
                TokenKind::Symbol('}') => break,
                TokenKind::Symbol(';') => {}
                TokenKind::Ident(word) if word == "option" => self.skip_statement()?,
                TokenKind::Ident(word) if word == "rpc" => {
                    let annotations = std::mem::take(&mut self.annotations);
                    let rpc_name = self.expect_ident()?;
                    let arg = self.parse_rpc_type(line)?;
                    self.expect_keyword("returns")?;
                    let ret = self.parse_rpc_type(line)?;
                    match self.expect_next()?.kind {
                        TokenKind::Symbol(';') => {}
                        TokenKind::Symbol('{') => self.skip_block()?,
                        other => {
                            return Err(parse_error(line, format!("unexpected token {other:?}")));
                        }
                    }
                    rpcs.push(RpcDef {
                        name: rpc_name,
                        annotations,
                        arg,
                        ret,
                    });
                }
                other => return Err(parse_error(line, format!("unexpected token {other:?}"))),
            }
        }
        Ok(ServiceDef { name, rpcs })
    }

    fn parse_rpc_type(&mut self, line: usize) -> Result<String> {
        self.expect_symbol('(')?;
        let ty = self.expect_ident()?;
        if ty == "stream" {
            return Err(parse_error(line, "streaming rpc is not supported"));
        }
        self.expect_symbol(')')?;
        Ok(ty)
    }

    /// 读取下一个记号，注解被收集到待附着列表中。
    fn next_significant(&mut self) -> Option<Token> {
        while let Some(token) = self.tokens.get(self.position).cloned() {
            self.position += 1;
            match token.kind {
                TokenKind::Annotation(annotation) => self.annotations.push(annotation),
                _ => return Some(token),
            }
        }
        None
    }

    fn expect_next(&mut self) -> Result<Token> {
        let token = self
            .tokens
            .get(self.position)
            .cloned()
            .ok_or_else(|| parse_error(self.last_line(), "unexpected end of input"))?;
        self.position += 1;
        Ok(token)
    }

    fn peek_ident(&self) -> Option<&str> {
        match self.tokens.get(self.position).map(|token| &token.kind) {
            Some(TokenKind::Ident(ident)) => Some(ident),
            _ => None,
        }
    }

    fn last_line(&self) -> usize {
        self.tokens.last().map_or(1, |token| token.line)
    }

    fn expect_symbol(&mut self, symbol: char) -> Result<()> {
        let token = self.expect_next()?;
        match token.kind {
            TokenKind::Symbol(found) if found == symbol => Ok(()),
            other => Err(parse_error(
                token.line,
                format!("expected `{symbol}`, found {other:?}"),
            )),
        }
    }

    fn expect_ident(&mut self) -> Result<String> {
        let token = self.expect_next()?;
        match token.kind {
            TokenKind::Ident(ident) => Ok(ident),
            other => Err(parse_error(
                token.line,
                format!("expected identifier, found {other:?}"),
            )),
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<()> {
        let line = self.tokens.get(self.position).map_or(self.last_line(), |t| t.line);
        match self.expect_ident()? {
            found if found == keyword => Ok(()),
            found => Err(parse_error(line, format!("expected `{keyword}`, found `{found}`"))),
        }
    }

    fn expect_int(&mut self) -> Result<i64> {
        let token = self.expect_next()?;
        match token.kind {
            TokenKind::Int(value) => Ok(value),
            other => Err(parse_error(
                token.line,
                format!("expected integer, found {other:?}"),
            )),
        }
    }

    fn expect_str(&mut self) -> Result<String> {
        let token = self.expect_next()?;
        match token.kind {
            TokenKind::Str(value) => Ok(value),
            other => Err(parse_error(
                token.line,
                format!("expected string literal, found {other:?}"),
            )),
        }
    }

    fn skip_statement(&mut self) -> Result<()> {
        loop {
            if let TokenKind::Symbol(';') = self.expect_next()?.kind {
                return Ok(());
            }
        }
    }

    fn skip_options(&mut self) -> Result<()> {
        if let Some(TokenKind::Symbol('[')) = self.tokens.get(self.position).map(|t| &t.kind) {
            self.position += 1;
            loop {
                if let TokenKind::Symbol(']') = self.expect_next()?.kind {
                    break;
                }
            }
        }
        Ok(())
    }

    fn skip_block(&mut self) -> Result<()> {
        let mut depth = 1usize;
        while depth > 0 {
            match self.expect_next()?.kind {
                TokenKind::Symbol('{') => depth += 1,
                TokenKind::Symbol('}') => depth -= 1,
                _ => {}
            }
        }
        Ok(())
    }
}

impl RawProto {
    fn resolve(self) -> Result<Proto> {
        let mut proto = Proto {
            syntax: self.syntax.unwrap_or_else(|| "proto3".to_owned()),
            package: self.package,
            imports: self.imports,
            definitions: Vec::with_capacity(self.definitions.len()),
            services: self.services,
        };
        // 先登记全部名称，字段类型暂置为 Any，第二遍再替换为真实类型。
        let mut pending = Vec::new();
        for definition in self.definitions {
            match definition {
                RawDefinition::Enum(enumeration) => {
                    proto.definitions.push(Definition::Enum(enumeration));
                }
                RawDefinition::Message(message) => {
                    let mut shell = MessageDef::new(message.name.clone());
                    shell.annotations = message.annotations;
                    proto.definitions.push(Definition::Message(shell));
                    pending.push((proto.definitions.len() - 1, message.name, message.fields));
                }
            }
        }
        for (position, message_name, raw_fields) in pending {
            let mut fields = Vec::with_capacity(raw_fields.len());
            for raw in raw_fields {
                let context = format!("{message_name}.{}", raw.name);
                let ty = match &raw.ty {
                    RawType::Named(name) => resolve_named(&proto, name, &context)?,
                    RawType::Map(key, value) => {
                        let key = ScalarType::from_name(key).ok_or_else(|| {
                            parse_error(raw.line, format!("`{context}`: map key `{key}` must be a scalar"))
                        })?;
                        FieldType::Map {
                            key,
                            value: Box::new(resolve_named(&proto, value, &context)?),
                        }
                    }
                };
                fields.push(FieldDef {
                    name: raw.name,
                    tag: raw.tag,
                    repeated: raw.repeated,
                    ty,
                });
            }
            if let Some(Definition::Message(message)) = proto.definitions.get_mut(position) {
                message.fields = fields;
            }
        }
        proto.validate()?;
        Ok(proto)
    }
}

fn resolve_named(proto: &Proto, name: &str, context: &str) -> Result<FieldType> {
    if let Some(scalar) = ScalarType::from_name(name) {
        return Ok(FieldType::Scalar(scalar));
    }
    let name = name.strip_prefix('.').unwrap_or(name);
    if name == ANY_TYPE {
        return Ok(FieldType::Any);
    }
    if name == EMPTY_TYPE {
        return Ok(FieldType::Message(EMPTY_TYPE.to_owned()));
    }
    let short = proto.short_name(name);
    if proto.message(short).is_some() {
        return Ok(FieldType::Message(short.to_owned()));
    }
    if proto.enum_def(short).is_some() {
        return Ok(FieldType::Enum(short.to_owned()));
    }
    Err(ProtoError::UnknownType {
        type_name: name.to_owned(),
        context: context.to_owned(),
    })
}
