use std::fmt;
use std::iter::Peekable;
use std::str::CharIndices;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
	/// Any run of characters other than whitespace and the symbols below.
	/// Keywords are words too; the parser matches them case-insensitively.
	Word(String),

	// Symbols
	LeftParen,  // (
	RightParen, // )
	Comma,      // ,
	Semicolon,  // ;
	Star,       // *

	Eof,
}

impl Token {
	pub fn is_keyword(&self, keyword: &str) -> bool {
		matches!(self, Token::Word(w) if w.eq_ignore_ascii_case(keyword))
	}
}

impl fmt::Display for Token {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Token::Word(w) => write!(f, "'{}'", w),
			Token::LeftParen => f.write_str("'('"),
			Token::RightParen => f.write_str("')'"),
			Token::Comma => f.write_str("','"),
			Token::Semicolon => f.write_str("';'"),
			Token::Star => f.write_str("'*'"),
			Token::Eof => f.write_str("end of input"),
		}
	}
}

pub struct Lexer<'a> {
	input: &'a str,
	chars: Peekable<CharIndices<'a>>,
}

impl<'a> Lexer<'a> {
	pub fn new(input: &'a str) -> Self {
		Self {
			input,
			chars: input.char_indices().peekable(),
		}
	}

	pub fn next_token(&mut self) -> Token {
		self.skip_whitespace();

		let Some(&(start, ch)) = self.chars.peek() else {
			return Token::Eof;
		};

		let symbol = match ch {
			'(' => Some(Token::LeftParen),
			')' => Some(Token::RightParen),
			',' => Some(Token::Comma),
			';' => Some(Token::Semicolon),
			'*' => Some(Token::Star),
			_ => None,
		};
		if let Some(token) = symbol {
			self.chars.next();
			return token;
		}

		self.read_word(start)
	}

	/// Collect all remaining tokens, excluding `Eof`.
	pub fn tokenize(mut self) -> Vec<Token> {
		let mut tokens = Vec::new();
		loop {
			match self.next_token() {
				Token::Eof => return tokens,
				token => tokens.push(token),
			}
		}
	}

	fn skip_whitespace(&mut self) {
		while self.chars.next_if(|(_, ch)| ch.is_whitespace()).is_some() {}
	}

	fn read_word(&mut self, start: usize) -> Token {
		let mut end = start;
		while let Some((pos, ch)) = self.chars.next_if(|&(_, ch)| is_word_char(ch)) {
			end = pos + ch.len_utf8();
		}
		Token::Word(self.input[start..end].to_string())
	}
}

fn is_word_char(ch: char) -> bool {
	!ch.is_whitespace() && !matches!(ch, '(' | ')' | ',' | ';' | '*')
}

#[cfg(test)]
mod tests {
	use super::*;

	fn word(s: &str) -> Token {
		Token::Word(s.to_string())
	}

	#[test]
	fn test_symbols_split_words() {
		let tokens = Lexer::new("INSERT (k1,v1),( k2 , v2 ) INTO t;").tokenize();
		assert_eq!(
			tokens,
			vec![
				word("INSERT"),
				Token::LeftParen,
				word("k1"),
				Token::Comma,
				word("v1"),
				Token::RightParen,
				Token::Comma,
				Token::LeftParen,
				word("k2"),
				Token::Comma,
				word("v2"),
				Token::RightParen,
				word("INTO"),
				word("t"),
				Token::Semicolon,
			]
		);
	}

	#[test]
	fn test_words_keep_punctuation_and_unicode() {
		let tokens = Lexer::new("SELECT user.name-1 FROM täble").tokenize();
		assert_eq!(
			tokens,
			vec![word("SELECT"), word("user.name-1"), word("FROM"), word("täble")]
		);
	}

	#[test]
	fn test_keyword_match_ignores_case() {
		assert!(word("from").is_keyword("FROM"));
		assert!(!word("fromage").is_keyword("FROM"));
		assert!(!Token::Star.is_keyword("FROM"));
	}

	#[test]
	fn test_empty_input() {
		let mut lexer = Lexer::new("   \t\n");
		assert_eq!(lexer.next_token(), Token::Eof);
	}
}
