use crate::ast::{Arg, Backend, Document, NameArgs, ParsedRoute, Predicates, RouteAst};
use crate::error::{Error, Position, Result};
use crate::lexer::{Lexer, Spanned, Token};

/// Parses a whole eskip document: zero or more `;`-separated route definitions.
///
/// A single malformed route does not invalidate the document (`spec.md` §4.1): on a syntax
/// error, the parser resynchronizes at the next top-level `;` and keeps going, recording the
/// error against that one route's slot in the returned [`Document`].
pub fn parse(src: &str) -> Document {
    let mut doc = Document::default();
    let segments = split_routes(src);
    for source in segments {
        let trimmed = source.trim();
        if trimmed.is_empty() {
            continue;
        }
        let result = parse_one(trimmed);
        doc.routes.push(ParsedRoute {
            source: trimmed.to_string(),
            result,
        });
    }
    doc
}

/// Splits the raw source into `;`-delimited route segments, respecting string/regex literals and
/// comments so a `;` inside a quoted arg does not split a route in half.
fn split_routes(src: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut cur = String::new();
    let mut chars = src.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            ';' => {
                out.push(std::mem::take(&mut cur));
            }
            '"' => {
                cur.push(c);
                while let Some(c) = chars.next() {
                    cur.push(c);
                    if c == '\\' {
                        if let Some(n) = chars.next() {
                            cur.push(n);
                        }
                    } else if c == '"' {
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'/') => {
                cur.push(c);
                for c in chars.by_ref() {
                    cur.push(c);
                    if c == '\n' {
                        break;
                    }
                }
            }
            '/' => {
                cur.push(c);
                while let Some(c) = chars.next() {
                    cur.push(c);
                    if c == '\\' {
                        if let Some(n) = chars.next() {
                            cur.push(n);
                        }
                    } else if c == '/' {
                        break;
                    }
                }
            }
            c => cur.push(c),
        }
    }
    if !cur.trim().is_empty() {
        out.push(cur);
    }
    out
}

fn parse_one(src: &str) -> Result<RouteAst> {
    let tokens = Lexer::new(src).tokenize()?;
    let mut p = Parser { tokens, idx: 0 };
    let route = p.route()?;
    p.expect_eof()?;
    Ok(route)
}

struct Parser {
    tokens: Vec<Spanned>,
    idx: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.idx].token
    }

    fn pos(&self) -> Position {
        self.tokens[self.idx].pos
    }

    fn advance(&mut self) -> Token {
        let t = self.tokens[self.idx].token.clone();
        if self.idx + 1 < self.tokens.len() {
            self.idx += 1;
        }
        t
    }

    fn expect_eof(&mut self) -> Result<()> {
        match self.peek() {
            Token::Eof => Ok(()),
            other => Err(Error::UnexpectedToken {
                expected: "end of route".into(),
                found: other.to_string(),
                pos: self.pos(),
            }),
        }
    }

    fn expect(&mut self, want: &Token) -> Result<()> {
        if std::mem::discriminant(self.peek()) == std::mem::discriminant(want) {
            self.advance();
            Ok(())
        } else {
            Err(Error::UnexpectedToken {
                expected: want.to_string(),
                found: self.peek().to_string(),
                pos: self.pos(),
            })
        }
    }

    fn route(&mut self) -> Result<RouteAst> {
        let id = self.maybe_id()?;
        let predicates = self.predicates()?;
        self.expect(&Token::Arrow)?;
        let mut filters = Vec::new();
        let backend = loop {
            match self.peek().clone() {
                Token::Str(_) | Token::LAngle => break self.backend()?,
                Token::Ident(_) => {
                    let na = self.name_args()?;
                    self.expect(&Token::Arrow)?;
                    filters.push(na);
                }
                other => {
                    return Err(Error::UnexpectedToken {
                        expected: "filter or backend".into(),
                        found: other.to_string(),
                        pos: self.pos(),
                    });
                }
            }
        };
        Ok(RouteAst {
            id,
            predicates,
            filters,
            backend,
        })
    }

    fn maybe_id(&mut self) -> Result<Option<String>> {
        if let Token::Ident(name) = self.peek().clone() {
            if matches!(self.tokens.get(self.idx + 1).map(|s| &s.token), Some(Token::Colon)) {
                self.advance();
                self.advance();
                return Ok(Some(name));
            }
        }
        Ok(None)
    }

    fn predicates(&mut self) -> Result<Predicates> {
        if matches!(self.peek(), Token::Star) {
            self.advance();
            return Ok(Predicates::Any);
        }
        let pos = self.pos();
        let mut preds = Vec::new();
        loop {
            preds.push(self.name_args()?);
            if matches!(self.peek(), Token::And) {
                self.advance();
                continue;
            }
            break;
        }
        if preds.is_empty() {
            return Err(Error::EmptyPredicates { pos });
        }
        if preds.len() == 1 && preds[0].name == "Any" && preds[0].args.is_empty() {
            return Ok(Predicates::Any);
        }
        Ok(Predicates::All(preds))
    }

    fn name_args(&mut self) -> Result<NameArgs> {
        let name = match self.advance() {
            Token::Ident(s) => s,
            other => {
                return Err(Error::UnexpectedToken {
                    expected: "identifier".into(),
                    found: other.to_string(),
                    pos: self.pos(),
                });
            }
        };
        self.expect(&Token::LParen)?;
        let mut args = Vec::new();
        if !matches!(self.peek(), Token::RParen) {
            loop {
                args.push(self.arg()?);
                if matches!(self.peek(), Token::Comma) {
                    self.advance();
                    continue;
                }
                break;
            }
        }
        self.expect(&Token::RParen)?;
        Ok(NameArgs { name, args })
    }

    fn arg(&mut self) -> Result<Arg> {
        match self.advance() {
            Token::Number(n) => Ok(Arg::Number(n)),
            Token::Str(s) => Ok(Arg::Str(s)),
            Token::Regex(s) => Ok(Arg::Regex(s)),
            other => Err(Error::UnexpectedToken {
                expected: "argument".into(),
                found: other.to_string(),
                pos: self.pos(),
            }),
        }
    }

    fn backend(&mut self) -> Result<Backend> {
        match self.advance() {
            Token::Str(url) => Ok(Backend::Network(url)),
            Token::LAngle => {
                let name = match self.advance() {
                    Token::Ident(s) => s,
                    other => {
                        return Err(Error::UnexpectedToken {
                            expected: "backend keyword".into(),
                            found: other.to_string(),
                            pos: self.pos(),
                        });
                    }
                };
                let backend = match name.as_str() {
                    "shunt" => {
                        self.expect(&Token::RAngle)?;
                        Backend::Shunt
                    }
                    "loopback" => {
                        self.expect(&Token::RAngle)?;
                        Backend::Loopback
                    }
                    "dynamic" => {
                        self.expect(&Token::RAngle)?;
                        Backend::Dynamic
                    }
                    algorithm => {
                        let mut endpoints = Vec::new();
                        while matches!(self.peek(), Token::Comma) {
                            self.advance();
                            match self.advance() {
                                Token::Str(s) => endpoints.push(s),
                                other => {
                                    return Err(Error::UnexpectedToken {
                                        expected: "endpoint url string".into(),
                                        found: other.to_string(),
                                        pos: self.pos(),
                                    });
                                }
                            }
                        }
                        self.expect(&Token::RAngle)?;
                        Backend::Lb {
                            algorithm: algorithm.to_string(),
                            endpoints,
                        }
                    }
                };
                Ok(backend)
            }
            other => Err(Error::UnexpectedToken {
                expected: "backend".into(),
                found: other.to_string(),
                pos: self.pos(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_shunt_scenario_a() {
        let doc = parse(
            r#"r: Path("/hello") -> inlineContent("hi") -> status(200) -> <shunt>;"#,
        );
        assert_eq!(doc.routes.len(), 1);
        let route = doc.routes[0].result.as_ref().unwrap();
        assert_eq!(route.id.as_deref(), Some("r"));
        assert_eq!(route.filters.len(), 2);
        assert_eq!(route.backend, Backend::Shunt);
    }

    #[test]
    fn parses_templated_path_and_network_backend() {
        let doc = parse(r#"r2: Path("/u/:id") -> setRequestHeader("X-User","${id}") -> "http://upstream:80";"#);
        let route = doc.routes[0].result.as_ref().unwrap();
        match &route.backend {
            Backend::Network(url) => assert_eq!(url, "http://upstream:80"),
            other => panic!("unexpected backend {other:?}"),
        }
    }

    #[test]
    fn parses_lb_backend() {
        let doc = parse(r#"r3: Path("/lb") -> <roundRobin,"http://a:80","http://b:80">;"#);
        let route = doc.routes[0].result.as_ref().unwrap();
        match &route.backend {
            Backend::Lb { algorithm, endpoints } => {
                assert_eq!(algorithm, "roundRobin");
                assert_eq!(endpoints, &vec!["http://a:80".to_string(), "http://b:80".to_string()]);
            }
            other => panic!("unexpected backend {other:?}"),
        }
    }

    #[test]
    fn parses_any_catch_all() {
        let doc = parse(r#"* -> <shunt>;"#);
        let route = doc.routes[0].result.as_ref().unwrap();
        assert_eq!(route.predicates, Predicates::Any);
    }

    #[test]
    fn parses_multiple_routes_and_isolates_errors() {
        let doc = parse(
            r#"
            ok1: Path("/a") -> <shunt>;
            bad: Path("/b" -> <shunt>;
            ok2: Path("/c") -> <shunt>;
            "#,
        );
        assert_eq!(doc.routes.len(), 3);
        assert!(doc.routes[0].result.is_ok());
        assert!(doc.routes[1].result.is_err());
        assert!(doc.routes[2].result.is_ok());
        assert_eq!(doc.oks().count(), 2);
        assert_eq!(doc.errors().count(), 1);
    }

    #[test]
    fn parses_conjunction_of_predicates() {
        let doc = parse(r#"r: Path("/x") && Method("GET") && Host(/^example\./) -> <shunt>;"#);
        let route = doc.routes[0].result.as_ref().unwrap();
        match &route.predicates {
            Predicates::All(preds) => assert_eq!(preds.len(), 3),
            _ => panic!("expected All"),
        }
    }

    #[test]
    fn round_trips_through_display() {
        let src = r#"r: Path("/hello") && Method("GET") -> setPath("/x") -> "http://a:80";"#;
        let doc = parse(src);
        let route = doc.routes[0].result.as_ref().unwrap();
        let printed = route.to_string();
        let doc2 = parse(&printed);
        let route2 = doc2.routes[0].result.as_ref().unwrap();
        assert_eq!(route, route2);
    }

    #[test]
    fn rejects_unrecognized_character() {
        let doc = parse("r: Path(\"/a\") -> <shunt> $;");
        assert!(doc.routes[0].result.is_err());
    }
}
