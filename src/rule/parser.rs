//! 규칙 문자열을 토큰화하고 AST로 파싱합니다.
//!
//! 문법: `Rule ::= Term (('&&' | '||') Term)* | '!' Rule | '(' Rule ')'`
//! 연산자 우선순위는 `!` > `&&` > `||` 이며, 괄호로 재정의할 수 있습니다.

use super::error::RuleError;
use super::matcher::Matcher;

/// 파싱된 규칙 AST입니다. 컴파일 이후에는 불변 술어로만 사용됩니다.
#[derive(Debug, Clone)]
pub enum RuleNode {
    Matcher(Matcher),
    And(Box<RuleNode>, Box<RuleNode>),
    Or(Box<RuleNode>, Box<RuleNode>),
    Not(Box<RuleNode>),
}

impl RuleNode {
    /// AST의 모든 매처 리프를 방문합니다.
    pub fn visit_matchers<'a>(&'a self, visit: &mut impl FnMut(&'a Matcher)) {
        match self {
            RuleNode::Matcher(matcher) => visit(matcher),
            RuleNode::And(left, right) | RuleNode::Or(left, right) => {
                left.visit_matchers(visit);
                right.visit_matchers(visit);
            }
            RuleNode::Not(inner) => inner.visit_matchers(visit),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Arg(String),
    And,
    Or,
    Not,
    LParen,
    RParen,
    Comma,
}

fn tokenize(input: &str) -> Result<Vec<(usize, Token)>, RuleError> {
    let mut tokens = Vec::new();
    let bytes = input.as_bytes();
    let mut pos = 0;

    while pos < bytes.len() {
        let ch = bytes[pos] as char;
        match ch {
            c if c.is_whitespace() => pos += 1,
            '(' => {
                tokens.push((pos, Token::LParen));
                pos += 1;
            }
            ')' => {
                tokens.push((pos, Token::RParen));
                pos += 1;
            }
            ',' => {
                tokens.push((pos, Token::Comma));
                pos += 1;
            }
            '!' => {
                tokens.push((pos, Token::Not));
                pos += 1;
            }
            '&' => {
                if bytes.get(pos + 1) == Some(&b'&') {
                    tokens.push((pos, Token::And));
                    pos += 2;
                } else {
                    return Err(RuleError::Syntax {
                        position: pos,
                        message: "'&&'가 필요함".to_string(),
                    });
                }
            }
            '|' => {
                if bytes.get(pos + 1) == Some(&b'|') {
                    tokens.push((pos, Token::Or));
                    pos += 2;
                } else {
                    return Err(RuleError::Syntax {
                        position: pos,
                        message: "'||'가 필요함".to_string(),
                    });
                }
            }
            '`' => {
                let start = pos + 1;
                match input[start..].find('`') {
                    Some(len) => {
                        tokens.push((pos, Token::Arg(input[start..start + len].to_string())));
                        pos = start + len + 1;
                    }
                    None => {
                        return Err(RuleError::Syntax {
                            position: pos,
                            message: "닫히지 않은 백틱 인자".to_string(),
                        })
                    }
                }
            }
            c if c.is_ascii_alphabetic() => {
                let start = pos;
                while pos < bytes.len() && (bytes[pos] as char).is_ascii_alphanumeric() {
                    pos += 1;
                }
                tokens.push((start, Token::Ident(input[start..pos].to_string())));
            }
            other => {
                return Err(RuleError::Syntax {
                    position: pos,
                    message: format!("예상치 못한 문자 '{}'", other),
                })
            }
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    input_len: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn next(&mut self) -> Option<(usize, Token)> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn position(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|(p, _)| *p)
            .unwrap_or(self.input_len)
    }

    fn expect(&mut self, expected: Token, what: &str) -> Result<(), RuleError> {
        match self.next() {
            Some((_, token)) if token == expected => Ok(()),
            Some((position, _)) => Err(RuleError::Syntax {
                position,
                message: format!("{} 필요", what),
            }),
            None => Err(RuleError::Syntax {
                position: self.input_len,
                message: format!("{} 필요 (규칙이 끝남)", what),
            }),
        }
    }

    // Or := And ('||' And)*
    fn parse_or(&mut self) -> Result<RuleNode, RuleError> {
        let mut node = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.next();
            let right = self.parse_and()?;
            node = RuleNode::Or(Box::new(node), Box::new(right));
        }
        Ok(node)
    }

    // And := Unary ('&&' Unary)*
    fn parse_and(&mut self) -> Result<RuleNode, RuleError> {
        let mut node = self.parse_unary()?;
        while self.peek() == Some(&Token::And) {
            self.next();
            let right = self.parse_unary()?;
            node = RuleNode::And(Box::new(node), Box::new(right));
        }
        Ok(node)
    }

    // Unary := '!' Unary | '(' Or ')' | Term
    fn parse_unary(&mut self) -> Result<RuleNode, RuleError> {
        match self.peek() {
            Some(Token::Not) => {
                self.next();
                let inner = self.parse_unary()?;
                Ok(RuleNode::Not(Box::new(inner)))
            }
            Some(Token::LParen) => {
                self.next();
                let node = self.parse_or()?;
                self.expect(Token::RParen, "')'")?;
                Ok(node)
            }
            _ => self.parse_term(),
        }
    }

    // Term := Ident '(' Arg (',' Arg)* ')'
    fn parse_term(&mut self) -> Result<RuleNode, RuleError> {
        let name = match self.next() {
            Some((_, Token::Ident(name))) => name,
            Some((position, _)) => {
                return Err(RuleError::Syntax {
                    position,
                    message: "매처 이름 필요".to_string(),
                })
            }
            None => {
                return Err(RuleError::Syntax {
                    position: self.input_len,
                    message: "매처 이름 필요 (규칙이 끝남)".to_string(),
                })
            }
        };

        self.expect(Token::LParen, "'('")?;

        let mut args = Vec::new();
        loop {
            match self.next() {
                Some((_, Token::Arg(arg))) => args.push(arg),
                Some((position, _)) => {
                    return Err(RuleError::Syntax {
                        position,
                        message: "백틱으로 감싼 인자 필요".to_string(),
                    })
                }
                None => {
                    return Err(RuleError::Syntax {
                        position: self.input_len,
                        message: "백틱으로 감싼 인자 필요 (규칙이 끝남)".to_string(),
                    })
                }
            }

            match self.next() {
                Some((_, Token::Comma)) => continue,
                Some((_, Token::RParen)) => break,
                Some((position, _)) => {
                    return Err(RuleError::Syntax {
                        position,
                        message: "',' 또는 ')' 필요".to_string(),
                    })
                }
                None => {
                    return Err(RuleError::Syntax {
                        position: self.input_len,
                        message: "')' 필요 (규칙이 끝남)".to_string(),
                    })
                }
            }
        }

        let matcher = Matcher::build(&name, &args)?;
        Ok(RuleNode::Matcher(matcher))
    }
}

/// 규칙 문자열을 AST로 파싱합니다.
pub fn parse(input: &str) -> Result<RuleNode, RuleError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(RuleError::Syntax {
            position: 0,
            message: "빈 규칙".to_string(),
        });
    }

    let mut parser = Parser {
        tokens,
        pos: 0,
        input_len: input.len(),
    };
    let node = parser.parse_or()?;

    if parser.peek().is_some() {
        return Err(RuleError::Syntax {
            position: parser.position(),
            message: "규칙 끝에 남은 토큰".to_string(),
        });
    }

    Ok(node)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_term() {
        let node = parse("Host(`example.com`)").unwrap();
        assert!(matches!(node, RuleNode::Matcher(Matcher::Host(_))));
    }

    #[test]
    fn test_parse_multiple_args() {
        let node = parse("Host(`a.com`, `b.com`)").unwrap();
        match node {
            RuleNode::Matcher(Matcher::Host(hosts)) => assert_eq!(hosts, vec!["a.com", "b.com"]),
            other => panic!("예상치 못한 노드: {:?}", other),
        }
    }

    #[test]
    fn test_operator_precedence() {
        // '&&'가 '||'보다 먼저 묶인다: a || (b && c)
        let node = parse("Host(`a`) || Host(`b`) && Path(`/c`)").unwrap();
        match node {
            RuleNode::Or(left, right) => {
                assert!(matches!(*left, RuleNode::Matcher(_)));
                assert!(matches!(*right, RuleNode::And(_, _)));
            }
            other => panic!("예상치 못한 노드: {:?}", other),
        }
    }

    #[test]
    fn test_parens_override_precedence() {
        let node = parse("(Host(`a`) || Host(`b`)) && Path(`/c`)").unwrap();
        match node {
            RuleNode::And(left, right) => {
                assert!(matches!(*left, RuleNode::Or(_, _)));
                assert!(matches!(*right, RuleNode::Matcher(_)));
            }
            other => panic!("예상치 못한 노드: {:?}", other),
        }
    }

    #[test]
    fn test_negation() {
        let node = parse("!Path(`/internal`)").unwrap();
        assert!(matches!(node, RuleNode::Not(_)));
    }

    #[test]
    fn test_syntax_errors() {
        assert!(parse("").is_err());
        assert!(parse("Host").is_err());
        assert!(parse("Host(`a`").is_err());
        assert!(parse("Host(`a`) &&").is_err());
        assert!(parse("Host(`a`) Host(`b`)").is_err());
        assert!(parse("Host(`unterminated").is_err());
        assert!(parse("Host(`a`) & Host(`b`)").is_err());
    }

    #[test]
    fn test_unknown_matcher_propagates() {
        let result = parse("WrongRule(`foo.bar`)");
        assert!(matches!(result, Err(RuleError::UnknownMatcher { .. })));
    }
}
