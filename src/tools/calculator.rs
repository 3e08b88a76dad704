//! 计算工具：四则运算表达式的安全求值
//!
//! 只接受数字、+-*/、小数点、括号与空格；递归下降解析，不做任何动态执行。
//! 非法字符与除零返回 Err（"Invalid ..." 前缀标记确定性校验失败，调用方不重试）。

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::Tool;

/// 计算工具
#[derive(Default)]
pub struct CalculatorTool;

/// 括号 / 一元负号的最大嵌套深度，超过即拒绝，防止递归耗尽栈
const MAX_NESTING_DEPTH: usize = 64;

struct Parser<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            chars: input.chars().peekable(),
            depth: 0,
        }
    }

    fn skip_ws(&mut self) {
        while matches!(self.chars.peek(), Some(c) if c.is_whitespace()) {
            self.chars.next();
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.skip_ws();
        self.chars.peek().copied()
    }

    /// expr := term (("+"|"-") term)*
    fn expr(&mut self) -> Result<f64, String> {
        let mut value = self.term()?;
        loop {
            match self.peek() {
                Some('+') => {
                    self.chars.next();
                    value += self.term()?;
                }
                Some('-') => {
                    self.chars.next();
                    value -= self.term()?;
                }
                _ => return Ok(value),
            }
        }
    }

    /// term := factor (("*"|"/") factor)*
    fn term(&mut self) -> Result<f64, String> {
        let mut value = self.factor()?;
        loop {
            match self.peek() {
                Some('*') => {
                    self.chars.next();
                    value *= self.factor()?;
                }
                Some('/') => {
                    self.chars.next();
                    let divisor = self.factor()?;
                    if divisor == 0.0 {
                        return Err("Invalid expression: division by zero".to_string());
                    }
                    value /= divisor;
                }
                _ => return Ok(value),
            }
        }
    }

    /// factor := number | "(" expr ")" | "-" factor
    fn factor(&mut self) -> Result<f64, String> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            return Err("Invalid expression: too deeply nested".to_string());
        }
        let value = self.factor_inner();
        self.depth -= 1;
        value
    }

    fn factor_inner(&mut self) -> Result<f64, String> {
        match self.peek() {
            Some('(') => {
                self.chars.next();
                let value = self.expr()?;
                match self.peek() {
                    Some(')') => {
                        self.chars.next();
                        Ok(value)
                    }
                    _ => Err("Invalid expression: unclosed parenthesis".to_string()),
                }
            }
            Some('-') => {
                self.chars.next();
                Ok(-self.factor()?)
            }
            Some(c) if c.is_ascii_digit() || c == '.' => self.number(),
            Some(c) => Err(format!("Invalid character in expression: '{}'", c)),
            None => Err("Invalid expression: unexpected end".to_string()),
        }
    }

    fn number(&mut self) -> Result<f64, String> {
        let mut raw = String::new();
        while matches!(self.chars.peek(), Some(c) if c.is_ascii_digit() || *c == '.') {
            raw.push(self.chars.next().ok_or("unexpected end")?);
        }
        raw.parse::<f64>()
            .map_err(|_| format!("Invalid number: '{}'", raw))
    }
}

/// 求值入口：整个输入必须被消费完
fn evaluate(expression: &str) -> Result<f64, String> {
    let allowed = |c: char| c.is_ascii_digit() || "+-*/.() ".contains(c);
    if !expression.chars().all(allowed) {
        return Err(
            "Invalid characters in expression. Only numbers and basic operators allowed."
                .to_string(),
        );
    }

    let mut parser = Parser::new(expression);
    let value = parser.expr()?;
    if parser.peek().is_some() {
        return Err("Invalid expression: trailing input".to_string());
    }
    Ok(value)
}

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculate"
    }

    fn description(&self) -> &str {
        "Evaluate an arithmetic expression (+ - * / and parentheses). Args: {\"expression\": \"2 + 3 * 4\"}."
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let expression = args
            .get("expression")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim();
        if expression.is_empty() {
            return Err("Missing expression".to_string());
        }

        let value = evaluate(expression)?;
        // 整数结果不带小数部分
        if value.fract() == 0.0 && value.abs() < 1e15 {
            Ok(format!("{} = {}", expression, value as i64))
        } else {
            Ok(format!("{} = {}", expression, value))
        }
    }
}
