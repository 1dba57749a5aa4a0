//! Textual type expressions: `int`, `T`, `IRepository<int>`, `Outer.Inner`, `T[]`, `byte*`, `dynamic`.

use crate::error::{Error, Result};
use crate::model::{DeclId, TypeRef};

/// Deepest nesting of generic arguments, array and pointer suffixes in one expression.
const MAX_TYPE_DEPTH: usize = 64;

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum TypeExpr {
    Named { name: String, args: Vec<TypeExpr> },
    Array(Box<TypeExpr>),
    Pointer(Box<TypeExpr>),
    Dynamic,
}

/// Generic parameters visible at a use site, innermost scope first.
#[derive(Clone, Debug, Default)]
pub(crate) struct ParamScopes {
    scopes: Vec<(DeclId, Vec<String>)>,
}

impl ParamScopes {
    pub(crate) fn with(mut self, owner: DeclId, params: &[String]) -> Self {
        self.scopes.push((owner, params.to_vec()));
        self
    }

    fn find(&self, name: &str) -> Option<TypeRef> {
        self.scopes.iter().find_map(|(owner, params)| {
            params
                .iter()
                .position(|param| param == name)
                .map(|ordinal| TypeRef::param(*owner, ordinal, name))
        })
    }
}

impl TypeExpr {
    pub(crate) fn parse(text: &str) -> Result<Self> {
        let mut parser = Parser {
            text,
            chars: text.char_indices().peekable(),
        };
        let expr = parser.parse_type(1)?;
        parser.skip_ws();
        match parser.chars.peek() {
            None => Ok(expr),
            Some(&(at, ch)) => Err(parser.error(at, &format!("unexpected `{ch}`"))),
        }
    }

    /// Bind names through `lookup(name, arity)` and the visible type parameters.
    pub(crate) fn resolve(
        &self,
        lookup: &dyn Fn(&str, usize) -> Option<DeclId>,
        scopes: &ParamScopes,
    ) -> Result<TypeRef> {
        match self {
            TypeExpr::Dynamic => Ok(TypeRef::Dynamic),
            TypeExpr::Array(element) => Ok(TypeRef::array(element.resolve(lookup, scopes)?)),
            TypeExpr::Pointer(pointee) => Ok(TypeRef::pointer(pointee.resolve(lookup, scopes)?)),
            TypeExpr::Named { name, args } => {
                if args.is_empty()
                    && let Some(param) = scopes.find(name)
                {
                    return Ok(param);
                }
                let definition = lookup(name, args.len()).ok_or_else(|| {
                    Error::config(format!("unknown type `{name}` with {} type argument(s)", args.len()))
                })?;
                let args = args
                    .iter()
                    .map(|arg| arg.resolve(lookup, scopes))
                    .collect::<Result<Vec<_>>>()?;
                Ok(TypeRef::generic(definition, args))
            }
        }
    }
}

struct Parser<'a> {
    text: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
}

impl Parser<'_> {
    fn parse_type(&mut self, mut depth: usize) -> Result<TypeExpr> {
        self.skip_ws();
        self.check_depth(depth)?;
        let name = self.parse_name()?;
        let mut expr = if name == "dynamic" {
            TypeExpr::Dynamic
        } else {
            let mut args = Vec::new();
            self.skip_ws();
            if self.eat('<') {
                loop {
                    args.push(self.parse_type(depth + 1)?);
                    self.skip_ws();
                    if self.eat(',') {
                        continue;
                    }
                    self.expect('>')?;
                    break;
                }
            }
            TypeExpr::Named { name, args }
        };
        loop {
            self.skip_ws();
            if self.eat('[') {
                self.expect(']')?;
                expr = TypeExpr::Array(Box::new(expr));
            } else if self.eat('*') {
                expr = TypeExpr::Pointer(Box::new(expr));
            } else {
                return Ok(expr);
            }
            depth += 1;
            self.check_depth(depth)?;
        }
    }

    fn check_depth(&mut self, depth: usize) -> Result<()> {
        if depth <= MAX_TYPE_DEPTH {
            return Ok(());
        }
        let at = self.chars.peek().map_or(self.text.len(), |&(at, _)| at);
        Err(self.error(at, &format!("nesting deeper than {MAX_TYPE_DEPTH}")))
    }

    fn parse_name(&mut self) -> Result<String> {
        let mut name = String::new();
        while let Some(&(_, ch)) = self.chars.peek() {
            if ch.is_alphanumeric() || ch == '_' || ch == '.' {
                name.push(ch);
                self.chars.next();
            } else {
                break;
            }
        }
        if name.is_empty() || name.starts_with('.') || name.ends_with('.') {
            let at = self.chars.peek().map_or(self.text.len(), |&(at, _)| at);
            return Err(self.error(at, "expected a type name"));
        }
        Ok(name)
    }

    fn skip_ws(&mut self) {
        while self.chars.next_if(|&(_, ch)| ch.is_whitespace()).is_some() {}
    }

    fn eat(&mut self, expected: char) -> bool {
        self.chars.next_if(|&(_, ch)| ch == expected).is_some()
    }

    fn expect(&mut self, expected: char) -> Result<()> {
        self.skip_ws();
        if self.eat(expected) {
            return Ok(());
        }
        let at = self.chars.peek().map_or(self.text.len(), |&(at, _)| at);
        Err(self.error(at, &format!("expected `{expected}`")))
    }

    fn error(&self, at: usize, message: &str) -> Error {
        Error::config(format!("invalid type `{}` at offset {at}: {message}", self.text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(name: &str, args: Vec<TypeExpr>) -> TypeExpr {
        TypeExpr::Named {
            name: name.into(),
            args,
        }
    }

    #[test]
    fn parses_nested_generics_and_suffixes() {
        let expr = TypeExpr::parse("Dictionary<string, List<int[]>>*").expect("parse");
        assert_eq!(
            expr,
            TypeExpr::Pointer(Box::new(named(
                "Dictionary",
                vec![
                    named("string", Vec::new()),
                    named("List", vec![TypeExpr::Array(Box::new(named("int", Vec::new())))]),
                ],
            )))
        );
        assert_eq!(TypeExpr::parse(" dynamic ").expect("parse"), TypeExpr::Dynamic);
        assert_eq!(TypeExpr::parse("Outer.Inner").expect("parse"), named("Outer.Inner", Vec::new()));
    }

    #[test]
    fn rejects_malformed_expressions() {
        for text in ["", "List<int", "List<>", "int]", ".Name"] {
            let error = TypeExpr::parse(text).expect_err(text);
            assert!(matches!(error, Error::Config { .. }), "{text}");
        }
    }

    #[test]
    fn nesting_depth_is_capped() {
        let nested = |levels: usize| format!("{}int{}", "List<".repeat(levels), ">".repeat(levels));
        TypeExpr::parse(&nested(MAX_TYPE_DEPTH - 1)).expect("at the limit");
        let error = TypeExpr::parse(&nested(MAX_TYPE_DEPTH)).expect_err("one level too deep");
        assert!(matches!(error, Error::Config { .. }), "{error}");
        assert!(error.to_string().contains("nesting deeper than 64"), "{error}");

        let deep_array = format!("int{}", "[]".repeat(100_000));
        let error = TypeExpr::parse(&deep_array).expect_err("suffix chain");
        assert!(error.to_string().contains("nesting deeper than 64"), "{error}");
    }

    #[test]
    fn resolves_parameters_before_types() {
        let owner = DeclId::new(7);
        let list = DeclId::new(3);
        let lookup = |name: &str, arity: usize| (name == "List" && arity == 1).then_some(list);
        let scopes = ParamScopes::default().with(owner, &["T".to_string()]);
        let resolved = TypeExpr::parse("List<T>")
            .expect("parse")
            .resolve(&lookup, &scopes)
            .expect("resolve");
        assert_eq!(resolved, TypeRef::generic(list, vec![TypeRef::param(owner, 0, "T")]));

        let error = TypeExpr::parse("Map<T>")
            .expect("parse")
            .resolve(&lookup, &scopes)
            .expect_err("unknown");
        assert_eq!(
            error.to_string(),
            "configuration error: unknown type `Map` with 1 type argument(s)"
        );
    }
}
