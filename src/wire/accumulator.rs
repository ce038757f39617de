use serde::de::DeserializeOwned;

/// Result of one [`JsonAccumulator::append`] attempt.
///
/// A failed parse mid-stream is the normal state of a JSON document that is
/// still growing; it is reported here, never raised as an error.
pub struct ParseOutcome<T> {
    pub success: bool,
    pub value: Option<T>,
    pub error: Option<String>,
    pub raw: String,
}

type Validator<T> = Box<dyn Fn(&T) -> bool + Send>;
type ParseHook<T> = Box<dyn FnMut(&T) + Send>;
type ErrorHook = Box<dyn FnMut(&str) + Send>;

pub struct JsonAccumulator<T> {
    buffer: String,
    active: bool,
    validator: Option<Validator<T>>,
    on_parse: Option<ParseHook<T>>,
    on_error: Option<ErrorHook>,
}

impl<T: DeserializeOwned> Default for JsonAccumulator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned> JsonAccumulator<T> {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            active: false,
            validator: None,
            on_parse: None,
            on_error: None,
        }
    }

    pub fn with_validator(mut self, validator: impl Fn(&T) -> bool + Send + 'static) -> Self {
        self.validator = Some(Box::new(validator));
        self
    }

    pub fn with_on_parse(mut self, hook: impl FnMut(&T) + Send + 'static) -> Self {
        self.on_parse = Some(Box::new(hook));
        self
    }

    pub fn with_on_error(mut self, hook: impl FnMut(&str) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(hook));
        self
    }

    pub fn start(&mut self) {
        self.buffer.clear();
        self.active = true;
    }

    /// Append a fragment and attempt a parse of the whole buffer.
    ///
    /// A missing or empty chunk mutates nothing and reports failure.
    /// Each append whose accumulated buffer independently parses and
    /// validates fires `on_parse`, transient validity included.
    pub fn append(&mut self, chunk: Option<&str>) -> ParseOutcome<T> {
        let Some(chunk) = chunk.filter(|c| !c.is_empty()) else {
            return ParseOutcome {
                success: false,
                value: None,
                error: Some("empty chunk".to_string()),
                raw: self.buffer.clone(),
            };
        };

        self.buffer.push_str(chunk);
        match serde_json::from_str::<T>(&self.buffer) {
            Ok(value) => {
                if self.validator.as_ref().is_some_and(|v| !v(&value)) {
                    let error = "validation failed".to_string();
                    if let Some(hook) = self.on_error.as_mut() {
                        hook(&error);
                    }
                    return ParseOutcome {
                        success: false,
                        value: None,
                        error: Some(error),
                        raw: self.buffer.clone(),
                    };
                }
                if let Some(hook) = self.on_parse.as_mut() {
                    hook(&value);
                }
                ParseOutcome {
                    success: true,
                    value: Some(value),
                    error: None,
                    raw: self.buffer.clone(),
                }
            }
            Err(parse_error) => {
                let error = parse_error.to_string();
                if let Some(hook) = self.on_error.as_mut() {
                    hook(&error);
                }
                ParseOutcome {
                    success: false,
                    value: None,
                    error: Some(error),
                    raw: self.buffer.clone(),
                }
            }
        }
    }

    pub fn finish(&mut self) -> Option<T> {
        if self.buffer.trim().is_empty() {
            return None;
        }
        let value = serde_json::from_str::<T>(&self.buffer).ok()?;
        if self.validator.as_ref().is_some_and(|v| !v(&value)) {
            return None;
        }
        Some(value)
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.active = false;
    }

    pub fn raw(&self) -> &str {
        &self.buffer
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}
