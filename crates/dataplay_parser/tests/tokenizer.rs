use dataplay_parser::tokens::{Token, Tokenizer};
use insta::assert_debug_snapshot;

#[test]
fn tokenize_simple_comparison() {
    assert_debug_snapshot!(Tokenizer::new("a = 1").tokenize().unwrap(), @r###"
    [
        TokenWithLocation {
            token: Word(
                Word {
                    value: "a",
                    quote: None,
                    keyword: None,
                },
            ),
            line: 1,
            col: 1,
        },
        TokenWithLocation {
            token: Whitespace,
            line: 1,
            col: 2,
        },
        TokenWithLocation {
            token: Eq,
            line: 1,
            col: 3,
        },
        TokenWithLocation {
            token: Whitespace,
            line: 1,
            col: 4,
        },
        TokenWithLocation {
            token: Number(
                "1",
            ),
            line: 1,
            col: 5,
        },
    ]
    "###);
}

#[test]
fn tokenize_quoted_identifier_is_not_keyword() {
    let toks = Tokenizer::new("\"select\"").tokenize().unwrap();
    assert_eq!(1, toks.len());
    match &toks[0].token {
        Token::Word(w) => {
            assert_eq!("select", w.value);
            assert_eq!(Some('"'), w.quote);
            assert_eq!(None, w.keyword);
        }
        other => panic!("unexpected token: {other:?}"),
    }
}

#[test]
fn tokenize_multiline_locations() {
    let toks = Tokenizer::new("select a\nfrom d1").tokenize().unwrap();
    let from = toks
        .iter()
        .find(|t| matches!(&t.token, Token::Word(w) if w.value == "from"))
        .unwrap();
    assert_eq!((2, 1), (from.line, from.col));
}
