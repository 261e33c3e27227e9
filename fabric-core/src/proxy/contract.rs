use crate::wire::Operation;

/// A method of the interface a proxy implements.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Method {
    name: String,
    params: Vec<String>,
}

impl Method {
    pub fn new<P>(name: impl Into<String>, params: impl IntoIterator<Item = P>) -> Self
    where
        P: Into<String>,
    {
        Self {
            name: name.into(),
            params: params.into_iter().map(Into::into).collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// Same name and the same parameter types in the same order.
    pub fn matches(&self, operation: &Operation) -> bool {
        self.name == operation.name() && self.params == operation.params()
    }
}

/// The interface side of a wire: the methods a client calls, plus the callback
/// contract for bidirectional services.
#[derive(Debug, Clone)]
pub struct ServiceContract {
    name: String,
    methods: Vec<Method>,
    callback: Option<Box<ServiceContract>>,
}

impl ServiceContract {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: Vec::new(),
            callback: None,
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.methods.push(method);
        self
    }

    pub fn with_callback(mut self, callback: ServiceContract) -> Self {
        self.callback = Some(Box::new(callback));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn methods(&self) -> &[Method] {
        &self.methods
    }

    pub fn callback(&self) -> Option<&ServiceContract> {
        self.callback.as_deref()
    }

    pub fn is_bidirectional(&self) -> bool {
        self.callback.is_some()
    }

    pub fn find(&self, operation: &Operation) -> Option<&Method> {
        self.methods.iter().find(|m| m.matches(operation))
    }
}
