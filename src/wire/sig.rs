//! # Type-Descriptor Language
//!
//! A *signature* string describes the type an element's property value, an
//! operation's argument, or an operation's return value must satisfy (spec
//! §4.2.5). Signatures are parsed once, when a [`crate::registry::Element`]
//! is registered, into a [`Sig`] tree, then matched against concrete
//! [`Value`]s on every `Get`/`Set`/`Exec`/`Response`.
//!
//! Grammar (spec §4.2.5):
//! ```text
//! sig      := type | type " -> " type
//! type     := atom | "[" type "]" | "(" type* ")" | "{" type type "}"
//! atom     := one of a closed set of single-character tags, plus "v" for Variant
//! ```
//! Note the grammar's `{ type type }` (our [`Sig::Pair`]) uses braces where
//! the wire payload table (§6.2/§6.3 examples like `{@[{s[{sv}]}]}`) also
//! uses braces for pairs nested in introspection signatures — this module's
//! parser and printer are consistent with those examples.

use crate::error::DiceyError;
use crate::wire::value::{Type, Value};

/// A parsed type descriptor. `Variant` matches any concrete value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sig {
    Variant,
    Atom(Type),
    Array(Box<Sig>),
    Tuple(Vec<Sig>),
    Pair(Box<Sig>, Box<Sig>),
}

/// An element's full signature: input type and, for operations, an output
/// type (`sig := type | type " -> " type"`, spec §4.2.5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub input: Sig,
    pub output: Option<Sig>,
}

impl Signature {
    pub fn parse(s: &str) -> Result<Self, DiceyError> {
        if let Some((input, output)) = s.split_once(" -> ") {
            let mut p = Parser::new(input);
            let input = p.parse_type()?;
            p.expect_end()?;
            let mut p = Parser::new(output);
            let output = p.parse_type()?;
            p.expect_end()?;
            Ok(Signature {
                input,
                output: Some(output),
            })
        } else {
            let mut p = Parser::new(s);
            let input = p.parse_type()?;
            p.expect_end()?;
            Ok(Signature {
                input,
                output: None,
            })
        }
    }
}

impl std::fmt::Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", print_sig(&self.input))?;
        if let Some(out) = &self.output {
            write!(f, " -> {}", print_sig(out))?;
        }
        Ok(())
    }
}

fn print_sig(sig: &Sig) -> String {
    match sig {
        Sig::Variant => "v".to_string(),
        Sig::Atom(t) => t.sig_char().to_string(),
        Sig::Array(inner) => format!("[{}]", print_sig(inner)),
        Sig::Tuple(items) => {
            let mut s = "(".to_string();
            for item in items {
                s.push_str(&print_sig(item));
            }
            s.push(')');
            s
        }
        Sig::Pair(a, b) => format!("{{{}{}}}", print_sig(a), print_sig(b)),
    }
}

struct Parser<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
}

impl<'a> Parser<'a> {
    fn new(s: &'a str) -> Self {
        Self {
            chars: s.chars().peekable(),
        }
    }

    fn expect_end(&mut self) -> Result<(), DiceyError> {
        if self.chars.peek().is_some() {
            return Err(DiceyError::Inval("trailing characters in signature".into()));
        }
        Ok(())
    }

    fn parse_type(&mut self) -> Result<Sig, DiceyError> {
        match self.chars.next() {
            Some('v') => Ok(Sig::Variant),
            Some('[') => {
                let inner = self.parse_type()?;
                self.expect_char(']')?;
                Ok(Sig::Array(Box::new(inner)))
            }
            Some('(') => {
                let mut items = Vec::new();
                while self.chars.peek() != Some(&')') {
                    if self.chars.peek().is_none() {
                        return Err(DiceyError::Inval("unterminated tuple signature".into()));
                    }
                    items.push(self.parse_type()?);
                }
                self.chars.next();
                Ok(Sig::Tuple(items))
            }
            Some('{') => {
                let a = self.parse_type()?;
                let b = self.parse_type()?;
                self.expect_char('}')?;
                Ok(Sig::Pair(Box::new(a), Box::new(b)))
            }
            Some(c) => atom_from_char(c).map(Sig::Atom),
            None => Err(DiceyError::Inval("empty signature".into())),
        }
    }

    fn expect_char(&mut self, expected: char) -> Result<(), DiceyError> {
        match self.chars.next() {
            Some(c) if c == expected => Ok(()),
            _ => Err(DiceyError::Inval(format!("expected '{}'", expected))),
        }
    }
}

fn atom_from_char(c: char) -> Result<Type, DiceyError> {
    Ok(match c {
        '$' => Type::Unit,
        'b' => Type::Bool,
        'c' => Type::Byte,
        'f' => Type::Float,
        'n' => Type::Int16,
        'i' => Type::Int32,
        'x' => Type::Int64,
        'q' => Type::UInt16,
        'u' => Type::UInt32,
        't' => Type::UInt64,
        'U' => Type::Uuid,
        'y' => Type::Bytes,
        's' => Type::Str,
        '@' => Type::Path,
        'e' => Type::Error,
        '%' => Type::Selector,
        _ => return Err(DiceyError::Inval(format!("unknown signature atom '{}'", c))),
    })
}

/// True iff `descriptor_tag` is `Variant` or equals `value_tag` (spec
/// §4.2.5 `is_compatible`).
pub fn is_compatible(value_tag: Type, descriptor: &Sig) -> bool {
    matches!(descriptor, Sig::Variant) || matches!(descriptor, Sig::Atom(t) if *t == value_tag)
}

/// Validate that `value` satisfies `sig` structurally (spec §4.2.5
/// `value_matches`), used for `Get` properties' stored value, `Set`
/// inputs, and `Exec` arguments.
pub fn value_matches(value: &Value, sig: &Sig) -> bool {
    match (value, sig) {
        (_, Sig::Variant) => true,
        (_, Sig::Atom(t)) => value.ty() == *t,
        (Value::Array(inner_ty, items), Sig::Array(inner_sig)) => {
            is_compatible(*inner_ty, inner_sig) && items.iter().all(|i| value_matches(i, inner_sig))
        }
        (Value::Tuple(items), Sig::Tuple(sigs)) => {
            items.len() == sigs.len()
                && items.iter().zip(sigs).all(|(i, s)| value_matches(i, s))
        }
        (Value::Pair(a, b), Sig::Pair(sa, sb)) => {
            value_matches(a, sa) && value_matches(b, sb)
        }
        _ => false,
    }
}

/// Validate that `value` is an acceptable return for `sig` (spec §4.2.5
/// `value_can_return`): identical to `value_matches` except an `Error`
/// value always satisfies any output signature, matching spec's "Error
/// values always satisfy return".
pub fn value_can_return(value: &Value, sig: &Sig) -> bool {
    matches!(value, Value::Error(_)) || value_matches(value, sig)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_atom() {
        let sig = Signature::parse("s").unwrap();
        assert_eq!(sig.input, Sig::Atom(Type::Str));
        assert!(sig.output.is_none());
    }

    #[test]
    fn parses_operation_with_arrow() {
        let sig = Signature::parse("(@%) -> b").unwrap();
        assert!(matches!(sig.input, Sig::Tuple(_)));
        assert_eq!(sig.output, Some(Sig::Atom(Type::Bool)));
    }

    #[test]
    fn parses_nested_array_and_pair() {
        let sig = Signature::parse("{@[{s[{sv}]}]}").unwrap();
        assert!(matches!(sig.input, Sig::Pair(..)));
    }

    #[test]
    fn roundtrips_through_display() {
        let sig = Signature::parse("[(ssb)]").unwrap();
        assert_eq!(sig.to_string(), "[(ssb)]");
    }

    #[test]
    fn variant_is_compatible_with_anything() {
        assert!(is_compatible(Type::Bool, &Sig::Variant));
        assert!(is_compatible(Type::Str, &Sig::Variant));
    }

    #[test]
    fn value_matches_checks_array_inner_type() {
        let sig = Signature::parse("[i]").unwrap();
        let good = Value::Array(Type::Int32, vec![Value::Int32(1)]);
        let bad = Value::Array(Type::Str, vec![Value::Str("x".into())]);
        assert!(value_matches(&good, &sig.input));
        assert!(!value_matches(&bad, &sig.input));
    }

    #[test]
    fn value_can_return_allows_error_for_any_output() {
        let sig = Signature::parse("b").unwrap();
        let err = Value::Error(crate::wire::value::ErrorValue {
            code: 1,
            message: "x".into(),
        });
        assert!(value_can_return(&err, &sig.input));
        assert!(!value_matches(&err, &sig.input));
    }
}
