//! Parsers for the host runtime's type annotation strings.
//!
//! The host runtime records the static type of every traced value as a string
//! such as `Tensor<float32, [2, ?]>` or `Optional[List[int]]`. This module
//! turns those strings into [`SourceType`]s. The grammar is:
//!
//! - The primitive types `bool`, `int`, `float`, `str`, `None` (or
//!   `NoneType`), `Device` and `Any`.
//! - Tensors as `Tensor`, `Tensor<dtype>` or `Tensor<dtype, [d, ...]>`, where
//!   the dtype may be `*` to leave it unknown and each `d` is either an extent
//!   or `?`.
//! - The generic containers `List[T]`, `Tuple[T, ...]`, `Optional[T]` and
//!   `Dict[K, V]`, as well as the shorthand `T?` for `Optional[T]`.
//! - Callables as `Callable[[P, ...], R]`, or `Callable[[P, ...], (R, ...)]`
//!   for anything other than a single result.
//! - Records as a dotted name followed by their fields, such as
//!   `__torch__.Point{x: float, y: float}`.
//!
//! Whitespace is permitted around every token.

use chumsky::{
    error::Simple,
    prelude::{choice, just, recursive},
    text::{self, TextParser},
    Parser,
};

use crate::types::{ScalarType, SourceType};

/// Simply to avoid typing out the whole parser type parameter specification
/// every single time given it only varies in one parameter.
pub trait TypeParser<T>: Parser<char, T, Error = Simple<char>> {}

/// A blanket impl to make this work.
impl<T, U> TypeParser<T> for U where U: Parser<char, T, Error = Simple<char>> {}

/// Parses the single character `c`, with optional surrounding whitespace.
#[must_use]
pub fn token(c: char) -> impl TypeParser<char> + Clone {
    just(c).padded()
}

/// Parses the name of a tensor element type.
#[must_use]
pub fn scalar_type() -> impl TypeParser<ScalarType> + Clone {
    text::ident().try_map(|name: String, span| {
        name.parse::<ScalarType>()
            .map_err(|e| Simple::custom(span, e.to_string()))
    })
}

/// Parses a single tensor dimension, which is either a non-negative extent or
/// `?` for an extent that is not statically known.
#[must_use]
pub fn dimension() -> impl TypeParser<Option<u64>> + Clone {
    just('?').to(None).or(text::int(10).try_map(|num: String, span| {
        num.parse::<u64>().map(Some).map_err(|_| {
            Simple::custom(span, format!("Could not parse {num} as a dimension extent"))
        })
    }))
}

/// Parses a tensor type with its optional element type and shape.
#[must_use]
pub fn tensor_type() -> impl TypeParser<SourceType> + Clone {
    let dtype = just('*').to(None).or(scalar_type().map(Some)).padded();
    let shape = dimension()
        .padded()
        .separated_by(token(','))
        .delimited_by(token('['), token(']'));

    text::keyword("Tensor")
        .ignore_then(
            dtype
                .then(token(',').ignore_then(shape).or_not())
                .delimited_by(token('<'), token('>'))
                .or_not(),
        )
        .map(|args| match args {
            Some((dtype, shape)) => SourceType::Tensor { dtype, shape },
            None => SourceType::tensor(),
        })
}

/// Parses a dot-separated qualified name such as `__torch__.model.Block`.
#[must_use]
pub fn qualified_name() -> impl TypeParser<String> + Clone {
    text::ident()
        .separated_by(just('.'))
        .at_least(1)
        .map(|parts: Vec<String>| parts.join("."))
}

/// Parses a complete type annotation.
///
/// Note that this parser does not consume the end of input, so callers that
/// need the whole string to be a type should follow it with
/// [`chumsky::prelude::end`].
#[must_use]
pub fn source_type() -> impl TypeParser<SourceType> + Clone {
    recursive(|ty| {
        let types = ty.clone().separated_by(token(','));

        let prim = choice((
            text::keyword("bool").to(SourceType::Bool),
            text::keyword("int").to(SourceType::Int),
            text::keyword("float").to(SourceType::Float),
            text::keyword("str").to(SourceType::Str),
            text::keyword("None").to(SourceType::NoneType),
            text::keyword("NoneType").to(SourceType::NoneType),
            text::keyword("Device").to(SourceType::Device),
            text::keyword("Any").to(SourceType::Any),
        ));

        let list = text::keyword("List")
            .ignore_then(ty.clone().delimited_by(token('['), token(']')))
            .map(SourceType::list_of);

        let tuple = text::keyword("Tuple")
            .ignore_then(types.clone().delimited_by(token('['), token(']')))
            .map(SourceType::Tuple);

        let optional = text::keyword("Optional")
            .ignore_then(ty.clone().delimited_by(token('['), token(']')))
            .map(SourceType::optional_of);

        let dict = text::keyword("Dict")
            .ignore_then(
                ty.clone()
                    .then_ignore(token(','))
                    .then(ty.clone())
                    .delimited_by(token('['), token(']')),
            )
            .map(|(key, value)| SourceType::dict_of(key, value));

        let results = types
            .clone()
            .delimited_by(token('('), token(')'))
            .or(ty.clone().map(|result| vec![result]));
        let callable = text::keyword("Callable")
            .ignore_then(
                types
                    .clone()
                    .delimited_by(token('['), token(']'))
                    .then_ignore(token(','))
                    .then(results)
                    .delimited_by(token('['), token(']')),
            )
            .map(|(params, results)| SourceType::Function { params, results });

        let field = text::ident().padded().then_ignore(token(':')).then(ty.clone());
        let record = qualified_name()
            .then(field.separated_by(token(',')).delimited_by(token('{'), token('}')))
            .map(|(name, fields)| SourceType::Record { name, fields });

        choice((prim, tensor_type(), list, tuple, optional, dict, callable, record))
            .padded()
            .then(token('?').repeated())
            .foldl(|inner, _| SourceType::optional_of(inner))
    })
}
