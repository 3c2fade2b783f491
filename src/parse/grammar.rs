use winnow::combinator::{alt, cut_err, opt, preceded, repeat, separated};
use winnow::error::{ModalResult, StrContext, StrContextValue};
use winnow::prelude::*;
use winnow::token::{any, take_while};

use crate::types::{BinaryOp, Expr, LogicalOp, UnaryOp};

// -- Whitespace -------------------------------------------------------------

fn ws(input: &mut &str) -> ModalResult<()> {
    take_while(0.., |c: char| c.is_ascii_whitespace())
        .void()
        .parse_next(input)
}

// -- Identifiers ------------------------------------------------------------

fn ident<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    (
        take_while(1.., |c: char| {
            c.is_ascii_alphabetic() || c == '_' || c == '$'
        }),
        take_while(0.., |c: char| {
            c.is_ascii_alphanumeric() || c == '_' || c == '$'
        }),
    )
        .take()
        .parse_next(input)
}

fn ident_or_keyword(input: &mut &str) -> ModalResult<Expr> {
    let name = ident.parse_next(input)?;
    Ok(match name {
        "true" => Expr::bool(true),
        "false" => Expr::bool(false),
        "null" => Expr::null(),
        _ => Expr::identifier(name),
    })
}

// -- Literals ---------------------------------------------------------------

fn string_literal(input: &mut &str) -> ModalResult<String> {
    let quote: char = alt(('\'', '"')).parse_next(input)?;
    let mut s = String::new();
    loop {
        let ch = any.parse_next(input)?;
        if ch == quote {
            return Ok(s);
        }
        match ch {
            '\\' => {
                let esc = any.parse_next(input)?;
                match esc {
                    'n' => s.push('\n'),
                    't' => s.push('\t'),
                    'r' => s.push('\r'),
                    other => s.push(other),
                }
            }
            c => s.push(c),
        }
    }
}

fn float_literal(input: &mut &str) -> ModalResult<f64> {
    // Only match floats that contain a decimal point
    (
        take_while(1.., |c: char| c.is_ascii_digit()),
        '.',
        take_while(1.., |c: char| c.is_ascii_digit()),
    )
        .take()
        .try_map(|s: &str| s.parse::<f64>())
        .parse_next(input)
}

fn int_literal(input: &mut &str) -> ModalResult<i64> {
    take_while(1.., |c: char| c.is_ascii_digit())
        .try_map(|s: &str| s.parse::<i64>())
        .parse_next(input)
}

// -- Primary & postfix ------------------------------------------------------

fn array_literal(input: &mut &str) -> ModalResult<Expr> {
    '['.parse_next(input)?;
    let items: Vec<Expr> = separated(0.., expression, (ws, ',')).parse_next(input)?;
    ws.parse_next(input)?;
    cut_err(']').parse_next(input)?;
    Ok(Expr::array(items))
}

fn paren_group(input: &mut &str) -> ModalResult<Expr> {
    '('.parse_next(input)?;
    let mut items: Vec<Expr> =
        cut_err(separated(1.., expression, (ws, ','))).parse_next(input)?;
    ws.parse_next(input)?;
    cut_err(')').parse_next(input)?;
    Ok(if items.len() == 1 {
        items.pop().expect("length checked above")
    } else {
        Expr::sequence(items)
    })
}

fn primary(input: &mut &str) -> ModalResult<Expr> {
    ws.parse_next(input)?;
    alt((
        string_literal.map(|s| Expr::string(s)),
        float_literal.map(Expr::float),
        int_literal.map(Expr::int),
        array_literal,
        paren_group,
        ident_or_keyword,
    ))
    .context(StrContext::Expected(StrContextValue::Description(
        "expression",
    )))
    .parse_next(input)
}

fn postfix(input: &mut &str) -> ModalResult<Expr> {
    let mut expr = primary(input)?;
    loop {
        let checkpoint = input.checkpoint();
        ws.parse_next(input)?;
        if opt('.').parse_next(input)?.is_some() {
            ws.parse_next(input)?;
            let name = cut_err(ident)
                .context(StrContext::Expected(StrContextValue::Description(
                    "property name",
                )))
                .parse_next(input)?;
            expr = Expr::member(expr, name);
        } else if opt('[').parse_next(input)?.is_some() {
            let index = cut_err(expression).parse_next(input)?;
            ws.parse_next(input)?;
            cut_err(']').parse_next(input)?;
            expr = Expr::index(expr, index);
        } else if opt('(').parse_next(input)?.is_some() {
            let args: Vec<Expr> = separated(0.., expression, (ws, ',')).parse_next(input)?;
            ws.parse_next(input)?;
            cut_err(')').parse_next(input)?;
            expr = Expr::call(expr, args);
        } else {
            input.reset(&checkpoint);
            return Ok(expr);
        }
    }
}

// -- Operators (precedence: ?: < || < && < == < relational < + < * < unary) -

fn unary(input: &mut &str) -> ModalResult<Expr> {
    ws.parse_next(input)?;
    let op = opt(alt((
        '!'.value(UnaryOp::Not),
        '-'.value(UnaryOp::Neg),
        '+'.value(UnaryOp::Pos),
    )))
    .parse_next(input)?;
    match op {
        Some(op) => {
            let operand = cut_err(unary).parse_next(input)?;
            Ok(Expr::unary(op, operand))
        }
        None => postfix(input),
    }
}

fn multiplicative(input: &mut &str) -> ModalResult<Expr> {
    let first = unary(input)?;
    let rest: Vec<(BinaryOp, Expr)> = repeat(
        0..,
        (
            preceded(
                ws,
                alt((
                    '*'.value(BinaryOp::Mul),
                    '/'.value(BinaryOp::Div),
                    '%'.value(BinaryOp::Mod),
                )),
            ),
            cut_err(unary),
        ),
    )
    .parse_next(input)?;
    Ok(rest
        .into_iter()
        .fold(first, |acc, (op, r)| Expr::binary(op, acc, r)))
}

fn additive(input: &mut &str) -> ModalResult<Expr> {
    let first = multiplicative(input)?;
    let rest: Vec<(BinaryOp, Expr)> = repeat(
        0..,
        (
            preceded(
                ws,
                alt(('+'.value(BinaryOp::Add), '-'.value(BinaryOp::Sub))),
            ),
            cut_err(multiplicative),
        ),
    )
    .parse_next(input)?;
    Ok(rest
        .into_iter()
        .fold(first, |acc, (op, r)| Expr::binary(op, acc, r)))
}

fn relational(input: &mut &str) -> ModalResult<Expr> {
    let first = additive(input)?;
    let rest: Vec<(BinaryOp, Expr)> = repeat(
        0..,
        (
            preceded(
                ws,
                alt((
                    "<=".value(BinaryOp::Lte),
                    ">=".value(BinaryOp::Gte),
                    '<'.value(BinaryOp::Lt),
                    '>'.value(BinaryOp::Gt),
                )),
            ),
            cut_err(additive),
        ),
    )
    .parse_next(input)?;
    Ok(rest
        .into_iter()
        .fold(first, |acc, (op, r)| Expr::binary(op, acc, r)))
}

fn equality(input: &mut &str) -> ModalResult<Expr> {
    let first = relational(input)?;
    let rest: Vec<(BinaryOp, Expr)> = repeat(
        0..,
        (
            preceded(
                ws,
                alt(("==".value(BinaryOp::Eq), "!=".value(BinaryOp::Neq))),
            ),
            cut_err(relational),
        ),
    )
    .parse_next(input)?;
    Ok(rest
        .into_iter()
        .fold(first, |acc, (op, r)| Expr::binary(op, acc, r)))
}

fn and_expr(input: &mut &str) -> ModalResult<Expr> {
    let first = equality(input)?;
    let rest: Vec<Expr> =
        repeat(0.., preceded((ws, "&&"), cut_err(equality))).parse_next(input)?;
    Ok(rest
        .into_iter()
        .fold(first, |acc, r| Expr::logical(LogicalOp::And, acc, r)))
}

fn or_expr(input: &mut &str) -> ModalResult<Expr> {
    let first = and_expr(input)?;
    let rest: Vec<Expr> =
        repeat(0.., preceded((ws, "||"), cut_err(and_expr))).parse_next(input)?;
    Ok(rest
        .into_iter()
        .fold(first, |acc, r| Expr::logical(LogicalOp::Or, acc, r)))
}

fn conditional(input: &mut &str) -> ModalResult<Expr> {
    let test = or_expr(input)?;
    let checkpoint = input.checkpoint();
    ws.parse_next(input)?;
    if opt('?').parse_next(input)?.is_some() {
        let consequent = cut_err(conditional).parse_next(input)?;
        ws.parse_next(input)?;
        cut_err(':').parse_next(input)?;
        let alternate = cut_err(conditional).parse_next(input)?;
        Ok(Expr::conditional(test, consequent, alternate))
    } else {
        input.reset(&checkpoint);
        Ok(test)
    }
}

pub(super) fn expression(input: &mut &str) -> ModalResult<Expr> {
    ws.parse_next(input)?;
    conditional(input)
}

pub(super) fn complete_expression(input: &mut &str) -> ModalResult<Expr> {
    let expr = expression(input)?;
    ws.parse_next(input)?;
    Ok(expr)
}
