//! Formula evaluator
//!
//! Evaluates an AST against a workbook to produce a value. Spreadsheet errors
//! (#DIV/0!, #REF!, ...) travel through evaluation as `Err(ErrorValue)` so `?`
//! propagates them exactly as a spreadsheet would, and `evaluate` turns them
//! back into `Value::Error` at the top.

use super::parser::{parse_formula, Expr, Reference};
use crate::core::address::{CellAddress, MAX_COL, MAX_ROW};
use crate::core::dates;
use crate::types::format_number;
use rand::Rng;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// Spreadsheet error classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorValue {
    DivZero,
    Ref,
    Value,
    Name,
    Num,
    NotAvailable,
    Null,
    Cycle,
}

impl ErrorValue {
    pub fn marker(&self) -> &'static str {
        match self {
            ErrorValue::DivZero => "#DIV/0!",
            ErrorValue::Ref => "#REF!",
            ErrorValue::Value => "#VALUE!",
            ErrorValue::Name => "#NAME?",
            ErrorValue::Num => "#NUM!",
            ErrorValue::NotAvailable => "#N/A",
            ErrorValue::Null => "#NULL!",
            ErrorValue::Cycle => "#CYCLE!",
        }
    }

    pub fn from_marker(marker: &str) -> Option<Self> {
        let marker = marker.trim();
        [
            ErrorValue::DivZero,
            ErrorValue::Ref,
            ErrorValue::Value,
            ErrorValue::Name,
            ErrorValue::Num,
            ErrorValue::NotAvailable,
            ErrorValue::Null,
            ErrorValue::Cycle,
        ]
        .into_iter()
        .find(|e| e.marker().eq_ignore_ascii_case(marker))
    }

    /// Human-readable explanation
    pub fn message(&self) -> &'static str {
        match self {
            ErrorValue::DivZero => "Division by zero",
            ErrorValue::Ref => "Invalid cell reference",
            ErrorValue::Value => "Wrong value type in formula",
            ErrorValue::Name => "Unknown function or name",
            ErrorValue::Num => "Invalid numeric value",
            ErrorValue::NotAvailable => "Value not available",
            ErrorValue::Null => "Ranges do not intersect",
            ErrorValue::Cycle => "Circular reference",
        }
    }
}

impl fmt::Display for ErrorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.marker())
    }
}

/// Value type produced by evaluation
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Text(String),
    Boolean(bool),
    Error(ErrorValue),
    Empty,
}

impl Value {
    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }

    pub fn error(&self) -> Option<ErrorValue> {
        match self {
            Value::Error(e) => Some(*e),
            _ => None,
        }
    }

    /// Render the value as a cell would display it
    pub fn as_text(&self) -> String {
        match self {
            Value::Number(n) => format_number(*n),
            Value::Text(s) => s.clone(),
            Value::Boolean(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            Value::Error(e) => e.marker().to_string(),
            Value::Empty => String::new(),
        }
    }

    fn into_result(self) -> Result<Value, ErrorValue> {
        match self {
            Value::Error(e) => Err(e),
            other => Ok(other),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_text())
    }
}

/// Read access to the workbook being evaluated
pub trait CellLookup {
    fn sheet_index(&self, name: &str) -> Option<usize>;

    /// Current value of one cell (Empty when unpopulated)
    fn value(&self, sheet: usize, address: CellAddress) -> Value;

    /// Populated cells inside the rectangle, row-major
    fn values_in(
        &self,
        sheet: usize,
        start: CellAddress,
        end: CellAddress,
    ) -> Vec<(CellAddress, Value)>;
}

type EvalResult = Result<Value, ErrorValue>;

/// A resolved reference: sheet index plus rectangle
#[derive(Debug, Clone, Copy)]
struct Area {
    sheet: usize,
    start: CellAddress,
    end: CellAddress,
}

impl Area {
    fn is_single_cell(&self) -> bool {
        self.start == self.end
    }
}

/// The populated cells of a rectangle, keyed by (row, col) offsets from its
/// top-left corner. Whole-column and whole-row ranges shrink to the populated
/// extent; everything else keeps its declared size.
struct Grid {
    rows: usize,
    cols: usize,
    cells: BTreeMap<(usize, usize), Value>,
}

impl Grid {
    fn get(&self, row: usize, col: usize) -> &Value {
        self.cells.get(&(row, col)).unwrap_or(&Value::Empty)
    }

    fn size(&self) -> usize {
        self.rows * self.cols
    }

    /// Populated cells of one column with their row offsets
    fn column(&self, col: usize) -> Vec<(usize, &Value)> {
        self.cells
            .iter()
            .filter(|((_, c), _)| *c == col)
            .map(|((r, _), v)| (*r, v))
            .collect()
    }

    /// Populated cells of a one-row or one-column grid with their offsets
    fn line(&self) -> Option<Vec<(usize, &Value)>> {
        if self.cols == 1 {
            Some(self.column(0))
        } else if self.rows == 1 {
            Some(self.cells.iter().map(|((_, c), v)| (*c, v)).collect())
        } else {
            None
        }
    }
}

/// Evaluates expressions for one formula cell
pub struct Evaluator<'a, L: CellLookup> {
    lookup: &'a L,
    /// Sheet that unqualified references resolve against
    sheet: usize,
}

impl<'a, L: CellLookup> Evaluator<'a, L> {
    pub fn new(lookup: &'a L, sheet: usize) -> Self {
        Self { lookup, sheet }
    }

    /// Evaluate an expression; errors come back as `Value::Error`
    pub fn evaluate(&self, expr: &Expr) -> Value {
        match self.eval(expr) {
            Ok(value) => value,
            Err(e) => Value::Error(e),
        }
    }

    fn eval(&self, expr: &Expr) -> EvalResult {
        match expr {
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::Text(s) => Ok(Value::Text(s.clone())),
            Expr::Boolean(b) => Ok(Value::Boolean(*b)),
            Expr::Error(marker) => Err(ErrorValue::from_marker(marker).unwrap_or(ErrorValue::Value)),
            Expr::Name(_) => Err(ErrorValue::Name),
            Expr::Reference(_) => {
                let area = self.area(expr)?.ok_or(ErrorValue::Ref)?;
                self.scalar(area)
            }
            Expr::FunctionCall { name, args } => {
                if let Some(area) = self.area(expr)? {
                    return self.scalar(area);
                }
                self.function(&name.to_ascii_uppercase(), args)
            }
            Expr::BinaryOp { .. } => {
                // Operator chains nest on the left; fold that spine in a loop
                let mut spine = Vec::new();
                let mut leftmost = expr;
                while let Expr::BinaryOp { op, left, right } = leftmost {
                    spine.push((op, right));
                    leftmost = &**left;
                }
                let mut value = self.eval(leftmost)?;
                for (op, right) in spine.into_iter().rev() {
                    let right = self.eval(right)?;
                    value = binary_op(op, &value, &right)?;
                }
                Ok(value)
            }
            Expr::UnaryOp { op, operand } => {
                let value = self.eval(operand)?;
                match op.as_str() {
                    "-" => number(-to_number(&value)?),
                    _ => Ok(value),
                }
            }
            Expr::Percent(operand) => number(to_number(&self.eval(operand)?)? / 100.0),
        }
    }

    /// Single-cell areas read as a value; anything wider is a #VALUE! in scalar context
    fn scalar(&self, area: Area) -> EvalResult {
        if !area.is_single_cell() {
            return Err(ErrorValue::Value);
        }
        self.lookup.value(area.sheet, area.start).into_result()
    }

    fn resolve(&self, reference: &Reference) -> Result<Area, ErrorValue> {
        let sheet = match &reference.sheet {
            Some(name) => self.lookup.sheet_index(name).ok_or(ErrorValue::Ref)?,
            None => self.sheet,
        };
        let (start, end) = reference.target.bounds();
        Ok(Area { sheet, start, end })
    }

    /// The area an expression refers to: plain references, INDIRECT and OFFSET.
    /// Ok(None) for expressions that produce values rather than references.
    fn area(&self, expr: &Expr) -> Result<Option<Area>, ErrorValue> {
        match expr {
            Expr::Reference(reference) => self.resolve(reference).map(Some),
            Expr::FunctionCall { name, args } if name.eq_ignore_ascii_case("INDIRECT") => {
                require_args_range(args, 1, 2)?;
                let text = to_text(&self.eval(&args[0])?)?;
                match parse_formula(&text) {
                    Ok(Expr::Reference(reference)) => self.resolve(&reference).map(Some),
                    _ => Err(ErrorValue::Ref),
                }
            }
            Expr::FunctionCall { name, args } if name.eq_ignore_ascii_case("OFFSET") => {
                require_args_range(args, 3, 5)?;
                let base = self.area(&args[0])?.ok_or(ErrorValue::Value)?;
                let rows = to_number(&self.eval(&args[1])?)?.trunc() as i64;
                let cols = to_number(&self.eval(&args[2])?)?.trunc() as i64;
                let height = match args.get(3) {
                    Some(arg) => to_number(&self.eval(arg)?)?.trunc() as i64,
                    None => i64::from(base.end.row - base.start.row) + 1,
                };
                let width = match args.get(4) {
                    Some(arg) => to_number(&self.eval(arg)?)?.trunc() as i64,
                    None => i64::from(base.end.col - base.start.col) + 1,
                };
                let top = i64::from(base.start.row).saturating_add(rows);
                let left = i64::from(base.start.col).saturating_add(cols);
                let bottom = top.saturating_add(height).saturating_sub(1);
                let right = left.saturating_add(width).saturating_sub(1);
                if height < 1
                    || width < 1
                    || top < 1
                    || left < 1
                    || bottom > i64::from(MAX_ROW)
                    || right > i64::from(MAX_COL)
                {
                    return Err(ErrorValue::Ref);
                }
                Ok(Some(Area {
                    sheet: base.sheet,
                    start: CellAddress::new(top as u32, left as u32),
                    end: CellAddress::new(bottom as u32, right as u32),
                }))
            }
            _ => Ok(None),
        }
    }

    fn grid(&self, area: Area) -> Grid {
        let populated = self.lookup.values_in(area.sheet, area.start, area.end);
        let last_row = populated
            .iter()
            .map(|(a, _)| a.row)
            .max()
            .unwrap_or(area.start.row);
        let last_col = populated
            .iter()
            .map(|(a, _)| a.col)
            .max()
            .unwrap_or(area.start.col);
        // Whole-column and whole-row ranges shrink to what is actually populated
        let rows = (if area.end.row == MAX_ROW {
            last_row - area.start.row + 1
        } else {
            area.end.row - area.start.row + 1
        }) as usize;
        let cols = (if area.end.col == MAX_COL {
            last_col - area.start.col + 1
        } else {
            area.end.col - area.start.col + 1
        }) as usize;

        let cells = populated
            .into_iter()
            .map(|(address, value)| {
                let r = (address.row - area.start.row) as usize;
                let c = (address.col - area.start.col) as usize;
                ((r, c), value)
            })
            .collect();
        Grid { rows, cols, cells }
    }

    /// Values an aggregate sees for one argument: populated cells of a reference,
    /// or the single evaluated value
    fn arg_values(&self, arg: &Expr) -> Result<ArgValues, ErrorValue> {
        match self.area(arg)? {
            Some(area) => Ok(ArgValues::Referenced(
                self.lookup
                    .values_in(area.sheet, area.start, area.end)
                    .into_iter()
                    .map(|(_, v)| v)
                    .collect(),
            )),
            None => Ok(ArgValues::Direct(self.eval(arg)?)),
        }
    }

    /// Numbers for SUM/AVERAGE/MIN/MAX. Referenced text and booleans are skipped;
    /// direct arguments are coerced.
    fn numbers(&self, args: &[Expr]) -> Result<Vec<f64>, ErrorValue> {
        let mut numbers = Vec::new();
        for arg in args {
            match self.arg_values(arg)? {
                ArgValues::Referenced(values) => {
                    for value in values {
                        match value {
                            Value::Number(n) => numbers.push(n),
                            Value::Error(e) => return Err(e),
                            _ => {}
                        }
                    }
                }
                ArgValues::Direct(value) => numbers.push(to_number(&value)?),
            }
        }
        Ok(numbers)
    }

    fn number_arg(&self, args: &[Expr], index: usize) -> Result<f64, ErrorValue> {
        match args.get(index) {
            Some(arg) => to_number(&self.eval(arg)?),
            None => Err(ErrorValue::NotAvailable),
        }
    }

    fn text_arg(&self, args: &[Expr], index: usize) -> Result<String, ErrorValue> {
        match args.get(index) {
            Some(arg) => to_text(&self.eval(arg)?),
            None => Err(ErrorValue::NotAvailable),
        }
    }

    fn function(&self, name: &str, args: &[Expr]) -> EvalResult {
        match name {
            // ═══════════════════════════════════════════════════════════════════════
            // AGGREGATES
            // ═══════════════════════════════════════════════════════════════════════
            "SUM" => number(self.numbers(args)?.iter().sum()),

            "AVERAGE" => {
                let values = self.numbers(args)?;
                if values.is_empty() {
                    return Err(ErrorValue::DivZero);
                }
                number(values.iter().sum::<f64>() / values.len() as f64)
            }

            "MIN" => {
                let values = self.numbers(args)?;
                number(values.into_iter().reduce(f64::min).unwrap_or(0.0))
            }

            "MAX" => {
                let values = self.numbers(args)?;
                number(values.into_iter().reduce(f64::max).unwrap_or(0.0))
            }

            "COUNT" => {
                let mut count = 0;
                for arg in args {
                    match self.arg_values(arg) {
                        Ok(ArgValues::Referenced(values)) => {
                            count += values
                                .iter()
                                .filter(|v| matches!(v, Value::Number(_)))
                                .count();
                        }
                        Ok(ArgValues::Direct(value)) => {
                            if to_number(&value).is_ok() && !matches!(value, Value::Empty) {
                                count += 1;
                            }
                        }
                        Err(_) => {}
                    }
                }
                number(count as f64)
            }

            "COUNTA" => {
                let mut count = 0;
                for arg in args {
                    match self.arg_values(arg) {
                        Ok(ArgValues::Referenced(values)) => {
                            count += values
                                .iter()
                                .filter(|v| !matches!(v, Value::Empty))
                                .count();
                        }
                        Ok(ArgValues::Direct(Value::Empty)) => {}
                        Ok(ArgValues::Direct(_)) | Err(_) => count += 1,
                    }
                }
                number(count as f64)
            }

            "SUMIF" | "COUNTIF" => {
                let is_sum = name == "SUMIF";
                if is_sum {
                    require_args_range(args, 2, 3)?;
                } else {
                    require_args(args, 2)?;
                }
                let area = self.area(&args[0])?.ok_or(ErrorValue::Value)?;
                let criterion = Criterion::new(&self.eval(&args[1])?);
                let tested = self.grid(area);
                let summed = match args.get(2) {
                    Some(arg) => {
                        let sum_area = self.area(arg)?.ok_or(ErrorValue::Value)?;
                        Some(self.grid(Area {
                            sheet: sum_area.sheet,
                            start: sum_area.start,
                            end: CellAddress::new(
                                (sum_area.start.row as usize + tested.rows - 1) as u32,
                                (sum_area.start.col as usize + tested.cols - 1) as u32,
                            ),
                        }))
                    }
                    None => None,
                };

                let source = summed.as_ref().unwrap_or(&tested);
                let mut total = 0.0;
                let mut count = 0;
                let mut add = |value: &Value| -> Result<(), ErrorValue> {
                    match value {
                        Value::Number(n) => total += n,
                        Value::Error(e) if is_sum => return Err(*e),
                        _ => {}
                    }
                    Ok(())
                };
                for (position, value) in &tested.cells {
                    if criterion.matches(value) {
                        count += 1;
                        add(source.get(position.0, position.1))?;
                    }
                }
                // Unpopulated cells only count when the criterion accepts blanks
                if criterion.matches(&Value::Empty) {
                    count += tested.size() - tested.cells.len();
                    if let Some(summed) = &summed {
                        for (position, value) in &summed.cells {
                            if !tested.cells.contains_key(position) {
                                add(value)?;
                            }
                        }
                    }
                }
                number(if is_sum { total } else { count as f64 })
            }

            // ═══════════════════════════════════════════════════════════════════════
            // LOGICAL
            // ═══════════════════════════════════════════════════════════════════════
            "IF" => {
                require_args_range(args, 2, 3)?;
                if to_bool(&self.eval(&args[0])?)? {
                    self.eval(&args[1])
                } else {
                    match args.get(2) {
                        Some(arg) => self.eval(arg),
                        None => Ok(Value::Boolean(false)),
                    }
                }
            }

            "IFERROR" => {
                require_args(args, 2)?;
                match self.eval(&args[0]) {
                    Ok(value) => Ok(value),
                    Err(_) => self.eval(&args[1]),
                }
            }

            "ISERROR" => {
                require_args(args, 1)?;
                Ok(Value::Boolean(self.eval(&args[0]).is_err()))
            }

            "ISBLANK" => {
                require_args(args, 1)?;
                Ok(Value::Boolean(matches!(self.eval(&args[0]), Ok(Value::Empty))))
            }

            "AND" | "OR" => {
                if args.is_empty() {
                    return Err(ErrorValue::NotAvailable);
                }
                let mut flags = Vec::new();
                for arg in args {
                    match self.arg_values(arg)? {
                        ArgValues::Referenced(values) => {
                            for value in values {
                                match value {
                                    Value::Number(_) | Value::Boolean(_) => {
                                        flags.push(to_bool(&value)?)
                                    }
                                    Value::Error(e) => return Err(e),
                                    _ => {}
                                }
                            }
                        }
                        ArgValues::Direct(value) => flags.push(to_bool(&value)?),
                    }
                }
                if flags.is_empty() {
                    return Err(ErrorValue::Value);
                }
                let result = if name == "AND" {
                    flags.iter().all(|f| *f)
                } else {
                    flags.iter().any(|f| *f)
                };
                Ok(Value::Boolean(result))
            }

            "NOT" => {
                require_args(args, 1)?;
                Ok(Value::Boolean(!to_bool(&self.eval(&args[0])?)?))
            }

            "NA" => {
                require_args(args, 0)?;
                Err(ErrorValue::NotAvailable)
            }

            // ═══════════════════════════════════════════════════════════════════════
            // MATH
            // ═══════════════════════════════════════════════════════════════════════
            "ABS" => {
                require_args(args, 1)?;
                number(self.number_arg(args, 0)?.abs())
            }

            "ROUND" => {
                require_args_range(args, 1, 2)?;
                let value = self.number_arg(args, 0)?;
                let digits = if args.len() > 1 {
                    self.number_arg(args, 1)?.trunc() as i32
                } else {
                    0
                };
                let multiplier = 10_f64.powi(digits);
                // 2.345 * 100 lands on 234.49999999999997; settle the noise first
                let scaled = ((value * multiplier) * 1e9).round() / 1e9;
                number(scaled.round() / multiplier)
            }

            "INT" => {
                require_args(args, 1)?;
                number(self.number_arg(args, 0)?.floor())
            }

            "MOD" => {
                require_args(args, 2)?;
                let n = self.number_arg(args, 0)?;
                let d = self.number_arg(args, 1)?;
                if d == 0.0 {
                    return Err(ErrorValue::DivZero);
                }
                number(n - d * (n / d).floor())
            }

            "POWER" => {
                require_args(args, 2)?;
                let base = self.number_arg(args, 0)?;
                let exponent = self.number_arg(args, 1)?;
                power(base, exponent)
            }

            "SQRT" => {
                require_args(args, 1)?;
                let value = self.number_arg(args, 0)?;
                if value < 0.0 {
                    return Err(ErrorValue::Num);
                }
                number(value.sqrt())
            }

            "LN" | "LOG10" => {
                require_args(args, 1)?;
                let value = self.number_arg(args, 0)?;
                if value <= 0.0 {
                    return Err(ErrorValue::Num);
                }
                number(if name == "LN" { value.ln() } else { value.log10() })
            }

            "RAND" => {
                require_args(args, 0)?;
                number(rand::thread_rng().gen::<f64>())
            }

            "RANDBETWEEN" => {
                require_args(args, 2)?;
                let low = self.number_arg(args, 0)?.ceil() as i64;
                let high = self.number_arg(args, 1)?.floor() as i64;
                if low > high {
                    return Err(ErrorValue::Num);
                }
                number(rand::thread_rng().gen_range(low..=high) as f64)
            }

            // ═══════════════════════════════════════════════════════════════════════
            // TEXT
            // ═══════════════════════════════════════════════════════════════════════
            "CONCAT" | "CONCATENATE" => {
                let mut out = String::new();
                for arg in args {
                    match self.arg_values(arg)? {
                        ArgValues::Referenced(values) => {
                            for value in values {
                                out.push_str(&to_text(&value)?);
                            }
                        }
                        ArgValues::Direct(value) => out.push_str(&to_text(&value)?),
                    }
                }
                Ok(Value::Text(out))
            }

            "LEN" => {
                require_args(args, 1)?;
                number(self.text_arg(args, 0)?.chars().count() as f64)
            }

            "UPPER" => {
                require_args(args, 1)?;
                Ok(Value::Text(self.text_arg(args, 0)?.to_uppercase()))
            }

            "LOWER" => {
                require_args(args, 1)?;
                Ok(Value::Text(self.text_arg(args, 0)?.to_lowercase()))
            }

            "TRIM" => {
                require_args(args, 1)?;
                let text = self.text_arg(args, 0)?;
                Ok(Value::Text(
                    text.split(' ')
                        .filter(|part| !part.is_empty())
                        .collect::<Vec<_>>()
                        .join(" "),
                ))
            }

            "LEFT" | "RIGHT" => {
                require_args_range(args, 1, 2)?;
                let text = self.text_arg(args, 0)?;
                let count = if args.len() > 1 {
                    self.number_arg(args, 1)?
                } else {
                    1.0
                };
                if count < 0.0 {
                    return Err(ErrorValue::Value);
                }
                let count = count.trunc() as usize;
                let chars: Vec<char> = text.chars().collect();
                let taken: String = if name == "LEFT" {
                    chars.iter().take(count).collect()
                } else {
                    chars[chars.len().saturating_sub(count)..].iter().collect()
                };
                Ok(Value::Text(taken))
            }

            // ═══════════════════════════════════════════════════════════════════════
            // DATES
            // ═══════════════════════════════════════════════════════════════════════
            "TODAY" => {
                require_args(args, 0)?;
                let now = chrono::Local::now().naive_local();
                number(dates::date_to_serial(now.date()))
            }

            "NOW" => {
                require_args(args, 0)?;
                let now = chrono::Local::now().naive_local();
                number(dates::datetime_to_serial(now))
            }

            "DATE" => {
                require_args(args, 3)?;
                let year = date_part(self.number_arg(args, 0)?)?;
                let month = date_part(self.number_arg(args, 1)?)?;
                let day = date_part(self.number_arg(args, 2)?)?;
                date_serial(year, month, day)
            }

            // ═══════════════════════════════════════════════════════════════════════
            // LOOKUP
            // ═══════════════════════════════════════════════════════════════════════
            "VLOOKUP" => {
                require_args_range(args, 3, 4)?;
                let needle = self.eval(&args[0])?;
                let table = self.grid(self.area(&args[1])?.ok_or(ErrorValue::Value)?);
                let column = self.number_arg(args, 2)?.trunc() as i64;
                let approximate = match args.get(3) {
                    Some(arg) => to_bool(&self.eval(arg)?)?,
                    None => true,
                };
                if column < 1 {
                    return Err(ErrorValue::Value);
                }
                if column as usize > table.cols {
                    return Err(ErrorValue::Ref);
                }
                let keys = table.column(0);
                let row = if approximate {
                    approximate_position(&keys, &needle, Ordering::Less)
                } else {
                    exact_position(&keys, &needle)
                }
                .ok_or(ErrorValue::NotAvailable)?;
                table.get(row, column as usize - 1).clone().into_result()
            }

            "MATCH" => {
                require_args_range(args, 2, 3)?;
                let needle = self.eval(&args[0])?;
                let grid = self.grid(self.area(&args[1])?.ok_or(ErrorValue::Value)?);
                let keys = grid.line().ok_or(ErrorValue::NotAvailable)?;
                let match_type = if args.len() > 2 {
                    self.number_arg(args, 2)?
                } else {
                    1.0
                };
                let position = if match_type == 0.0 {
                    exact_position(&keys, &needle)
                } else if match_type > 0.0 {
                    approximate_position(&keys, &needle, Ordering::Less)
                } else {
                    approximate_position(&keys, &needle, Ordering::Greater)
                }
                .ok_or(ErrorValue::NotAvailable)?;
                number((position + 1) as f64)
            }

            "INDEX" => {
                require_args_range(args, 2, 3)?;
                let grid = self.grid(self.area(&args[0])?.ok_or(ErrorValue::Value)?);
                let first = self.number_arg(args, 1)?.trunc() as i64;
                let (row, col) = match args.get(2) {
                    Some(_) => (first, self.number_arg(args, 2)?.trunc() as i64),
                    None if grid.rows == 1 => (1, first),
                    None => (first, 1),
                };
                if row < 1 || col < 1 || row as usize > grid.rows || col as usize > grid.cols {
                    return Err(ErrorValue::Ref);
                }
                grid.get(row as usize - 1, col as usize - 1)
                    .clone()
                    .into_result()
            }

            _ => Err(ErrorValue::Name),
        }
    }
}

enum ArgValues {
    Referenced(Vec<Value>),
    Direct(Value),
}

/// SUMIF/COUNTIF criteria: a plain value or an operator prefix ("<>x", ">=5")
struct Criterion {
    op: &'static str,
    operand: Value,
}

impl Criterion {
    fn new(value: &Value) -> Self {
        let Value::Text(text) = value else {
            return Self {
                op: "=",
                operand: value.clone(),
            };
        };
        let (op, rest) = ["<>", ">=", "<=", "=", ">", "<"]
            .into_iter()
            .find_map(|op| text.strip_prefix(op).map(|rest| (op, rest)))
            .unwrap_or(("=", text.as_str()));
        let operand = match rest.trim().parse::<f64>() {
            Ok(n) => Value::Number(n),
            Err(_) => Value::Text(rest.to_string()),
        };
        Self { op, operand }
    }

    fn matches(&self, value: &Value) -> bool {
        if value.is_error() {
            return false;
        }
        // Numeric criteria only match numbers; "=x" never matches blanks
        if matches!(self.operand, Value::Number(_)) && !matches!(value, Value::Number(_)) {
            return self.op == "<>";
        }
        if matches!(value, Value::Empty) && self.op == "=" {
            return false;
        }
        let ordering = compare(value, &self.operand);
        match self.op {
            "=" => ordering == Ordering::Equal,
            "<>" => ordering != Ordering::Equal,
            ">" => ordering == Ordering::Greater,
            "<" => ordering == Ordering::Less,
            ">=" => ordering != Ordering::Less,
            "<=" => ordering != Ordering::Greater,
            _ => false,
        }
    }
}

/// Offset of the first key equal to the needle. Keys are the populated cells
/// of a lookup line; a blank needle matches nothing.
fn exact_position(keys: &[(usize, &Value)], needle: &Value) -> Option<usize> {
    if matches!(needle, Value::Empty) {
        return None;
    }
    keys.iter()
        .find(|(_, key)| same_type(key, needle) && compare(key, needle) == Ordering::Equal)
        .map(|(offset, _)| *offset)
}

/// Sorted lookup: the last key on `side` of (or equal to) the needle
fn approximate_position(keys: &[(usize, &Value)], needle: &Value, side: Ordering) -> Option<usize> {
    if matches!(needle, Value::Empty) {
        return None;
    }
    let mut found = None;
    for (offset, key) in keys {
        if !same_type(key, needle) {
            continue;
        }
        let ordering = compare(key, needle);
        if ordering == Ordering::Equal || ordering == side {
            found = Some(*offset);
        } else {
            break;
        }
    }
    found
}

fn same_type(a: &Value, b: &Value) -> bool {
    std::mem::discriminant(a) == std::mem::discriminant(b)
}

fn require_args(args: &[Expr], count: usize) -> Result<(), ErrorValue> {
    if args.len() != count {
        Err(ErrorValue::NotAvailable)
    } else {
        Ok(())
    }
}

fn require_args_range(args: &[Expr], min: usize, max: usize) -> Result<(), ErrorValue> {
    if args.len() < min || args.len() > max {
        Err(ErrorValue::NotAvailable)
    } else {
        Ok(())
    }
}

/// Wrap a computed number, mapping NaN and infinities to #NUM!
fn number(n: f64) -> EvalResult {
    if n.is_finite() {
        Ok(Value::Number(n))
    } else {
        Err(ErrorValue::Num)
    }
}

fn power(base: f64, exponent: f64) -> EvalResult {
    if base == 0.0 && exponent < 0.0 {
        return Err(ErrorValue::DivZero);
    }
    number(base.powf(exponent))
}

pub(crate) fn to_number(value: &Value) -> Result<f64, ErrorValue> {
    match value {
        Value::Number(n) => Ok(*n),
        Value::Boolean(b) => Ok(if *b { 1.0 } else { 0.0 }),
        Value::Empty => Ok(0.0),
        Value::Text(s) => s.trim().parse::<f64>().map_err(|_| ErrorValue::Value),
        Value::Error(e) => Err(*e),
    }
}

fn to_text(value: &Value) -> Result<String, ErrorValue> {
    match value {
        Value::Error(e) => Err(*e),
        other => Ok(other.as_text()),
    }
}

fn to_bool(value: &Value) -> Result<bool, ErrorValue> {
    match value {
        Value::Boolean(b) => Ok(*b),
        Value::Number(n) => Ok(*n != 0.0),
        Value::Empty => Ok(false),
        Value::Text(s) if s.eq_ignore_ascii_case("TRUE") => Ok(true),
        Value::Text(s) if s.eq_ignore_ascii_case("FALSE") => Ok(false),
        Value::Text(_) => Err(ErrorValue::Value),
        Value::Error(e) => Err(*e),
    }
}

/// Spreadsheet ordering: numbers < text < booleans; text compares case-insensitively
fn compare(left: &Value, right: &Value) -> Ordering {
    fn rank(value: &Value) -> u8 {
        match value {
            Value::Number(_) | Value::Empty => 0,
            Value::Text(_) => 1,
            Value::Boolean(_) => 2,
            Value::Error(_) => 3,
        }
    }

    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
        (Value::Empty, Value::Number(b)) => 0.0_f64.partial_cmp(b).unwrap_or(Ordering::Equal),
        (Value::Number(a), Value::Empty) => a.partial_cmp(&0.0).unwrap_or(Ordering::Equal),
        (Value::Empty, Value::Empty) => Ordering::Equal,
        (Value::Text(a), Value::Text(b)) => a.to_lowercase().cmp(&b.to_lowercase()),
        (Value::Empty, Value::Text(b)) => String::new().cmp(&b.to_lowercase()),
        (Value::Text(a), Value::Empty) => a.to_lowercase().cmp(&String::new()),
        (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
        (Value::Empty, Value::Boolean(b)) => false.cmp(b),
        (Value::Boolean(a), Value::Empty) => a.cmp(&false),
        _ => rank(left).cmp(&rank(right)),
    }
}

fn binary_op(op: &str, left: &Value, right: &Value) -> EvalResult {
    match op {
        "+" => number(to_number(left)? + to_number(right)?),
        "-" => number(to_number(left)? - to_number(right)?),
        "*" => number(to_number(left)? * to_number(right)?),
        "/" => {
            let dividend = to_number(left)?;
            let divisor = to_number(right)?;
            if divisor == 0.0 {
                return Err(ErrorValue::DivZero);
            }
            number(dividend / divisor)
        }
        "^" => power(to_number(left)?, to_number(right)?),
        "&" => Ok(Value::Text(to_text(left)? + &to_text(right)?)),
        "=" => Ok(Value::Boolean(compare(left, right) == Ordering::Equal)),
        "<>" => Ok(Value::Boolean(compare(left, right) != Ordering::Equal)),
        "<" => Ok(Value::Boolean(compare(left, right) == Ordering::Less)),
        ">" => Ok(Value::Boolean(compare(left, right) == Ordering::Greater)),
        "<=" => Ok(Value::Boolean(compare(left, right) != Ordering::Greater)),
        ">=" => Ok(Value::Boolean(compare(left, right) != Ordering::Less)),
        _ => Err(ErrorValue::Value),
    }
}

/// One DATE argument as a whole number. Nothing outside the serial range can
/// land on a valid date, so larger magnitudes are #NUM! before any arithmetic.
fn date_part(n: f64) -> Result<i64, ErrorValue> {
    let n = n.trunc();
    if n.is_nan() || n.abs() > dates::MAX_SERIAL {
        return Err(ErrorValue::Num);
    }
    Ok(n as i64)
}

/// DATE(y, m, d) with month/day overflow rolling into the next unit
fn date_serial(year: i64, month: i64, day: i64) -> EvalResult {
    let year = if (0..1900).contains(&year) {
        year + 1900
    } else {
        year
    };
    if !(0..=9999).contains(&year) {
        return Err(ErrorValue::Num);
    }
    let months = year * 12 + (month - 1);
    let (y, m) = (months.div_euclid(12), months.rem_euclid(12) + 1);
    let first = i32::try_from(y)
        .ok()
        .and_then(|y| chrono::NaiveDate::from_ymd_opt(y, m as u32, 1))
        .ok_or(ErrorValue::Num)?;
    let date = first
        .checked_add_signed(chrono::Duration::days(day - 1))
        .ok_or(ErrorValue::Num)?;
    let serial = dates::date_to_serial(date);
    if !dates::is_valid_serial(serial) {
        return Err(ErrorValue::Num);
    }
    number(serial)
}
