use super::ast::{KeyValue, Statement};
use super::error::{ParseError, ParseResult};
use super::lexer::{Lexer, Token};

pub struct Parser<'a> {
    lexer: Lexer<'a>,
    current_token: Token,
}

impl<'a> Parser<'a> {
    pub fn new(input: &'a str) -> Self {
        let mut lexer = Lexer::new(input);
        let current_token = lexer.next_token();

        Self {
            lexer,
            current_token,
        }
    }

    /// Parse exactly one statement, optionally terminated by `;`.
    pub fn parse(mut self) -> ParseResult<Statement> {
        if self.current_token == Token::Eof {
            return Err(ParseError::EmptyInput);
        }

        let statement = self.parse_statement()?;

        if self.current_token == Token::Semicolon {
            self.advance();
        }

        if self.current_token != Token::Eof {
            let rest: Vec<String> = std::iter::once(self.current_token.clone())
                .chain(self.lexer.tokenize())
                .map(|t| t.to_string())
                .collect();
            return Err(ParseError::TrailingInput(rest.join(" ")));
        }

        Ok(statement)
    }

    fn parse_statement(&mut self) -> ParseResult<Statement> {
        let Token::Word(word) = &self.current_token else {
            return Err(ParseError::UnsupportedStatement(self.current_token.to_string()));
        };

        match word.to_ascii_uppercase().as_str() {
            "INSERT" => self.parse_insert(),
            "SELECT" => self.parse_select(),
            "UPDATE" => self.parse_update(),
            "DELETE" => self.parse_delete(),
            "DROP" => self.parse_drop(),
            "BEGIN" => self.parse_bare(Statement::Begin),
            "COMMIT" => self.parse_bare(Statement::Commit),
            "ROLLBACK" => self.parse_bare(Statement::Rollback),
            _ => Err(ParseError::UnsupportedStatement(word.clone())),
        }
    }

    // INSERT (k, v) [, (k, v)]* INTO table
    fn parse_insert(&mut self) -> ParseResult<Statement> {
        self.expect_keyword("INSERT")?;
        let pairs = self.parse_pair_list()?;
        self.expect_keyword("INTO")?;
        let table = self.parse_word("table name")?;

        Ok(Statement::Insert { table, pairs })
    }

    // SELECT * FROM table | SELECT k [, k]* FROM table
    fn parse_select(&mut self) -> ParseResult<Statement> {
        self.expect_keyword("SELECT")?;

        let keys = if self.current_token == Token::Star {
            self.advance();
            Vec::new()
        } else {
            self.parse_key_list()?
        };

        self.expect_keyword("FROM")?;
        let table = self.parse_word("table name")?;

        Ok(Statement::Select { table, keys })
    }

    // UPDATE table SET (k, v) [, (k, v)]*
    fn parse_update(&mut self) -> ParseResult<Statement> {
        self.expect_keyword("UPDATE")?;
        let table = self.parse_word("table name")?;
        self.expect_keyword("SET")?;
        let pairs = self.parse_pair_list()?;

        Ok(Statement::Update { table, pairs })
    }

    // DELETE k [, k]* FROM table
    fn parse_delete(&mut self) -> ParseResult<Statement> {
        self.expect_keyword("DELETE")?;
        let keys = self.parse_key_list()?;
        self.expect_keyword("FROM")?;
        let table = self.parse_word("table name")?;

        Ok(Statement::Delete { table, keys })
    }

    // DROP [TABLE] table
    fn parse_drop(&mut self) -> ParseResult<Statement> {
        self.expect_keyword("DROP")?;

        let first = self.parse_word("table name")?;
        if first.eq_ignore_ascii_case("TABLE") && matches!(self.current_token, Token::Word(_)) {
            let table = self.parse_word("table name")?;
            return Ok(Statement::Drop { table });
        }

        Ok(Statement::Drop { table: first })
    }

    fn parse_bare(&mut self, statement: Statement) -> ParseResult<Statement> {
        self.advance();
        Ok(statement)
    }

    fn parse_pair_list(&mut self) -> ParseResult<Vec<KeyValue>> {
        let mut pairs = vec![self.parse_pair()?];

        while self.current_token == Token::Comma {
            self.advance();
            pairs.push(self.parse_pair()?);
        }

        Ok(pairs)
    }

    fn parse_pair(&mut self) -> ParseResult<KeyValue> {
        self.expect(Token::LeftParen)?;
        let key = self.parse_word("key")?;
        self.expect(Token::Comma)?;
        let value = self.parse_word("value")?;
        self.expect(Token::RightParen)?;

        Ok(KeyValue { key, value })
    }

    fn parse_key_list(&mut self) -> ParseResult<Vec<String>> {
        let mut keys = vec![self.parse_key()?];

        while self.current_token == Token::Comma {
            self.advance();
            keys.push(self.parse_key()?);
        }

        Ok(keys)
    }

    fn parse_key(&mut self) -> ParseResult<String> {
        // A bare FROM here means the key list is missing
        if self.current_token.is_keyword("FROM") {
            return Err(self.unexpected_token("key"));
        }
        self.parse_word("key")
    }

    fn parse_word(&mut self, what: &str) -> ParseResult<String> {
        match &self.current_token {
            Token::Word(word) => {
                let word = word.clone();
                self.advance();
                Ok(word)
            }
            _ => Err(self.unexpected_token(what)),
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> ParseResult<()> {
        if self.current_token.is_keyword(keyword) {
            self.advance();
            Ok(())
        } else {
            Err(self.unexpected_token(keyword))
        }
    }

    fn expect(&mut self, expected: Token) -> ParseResult<()> {
        if self.current_token == expected {
            self.advance();
            Ok(())
        } else {
            Err(self.unexpected_token(&expected.to_string()))
        }
    }

    fn advance(&mut self) {
        self.current_token = self.lexer.next_token();
    }

    fn unexpected_token(&self, expected: &str) -> ParseError {
        ParseError::UnexpectedToken {
            expected: expected.to_string(),
            found: self.current_token.to_string(),
        }
    }
}
