use std::fmt;

/// An operation of a service contract as declared on the wire side.
///
/// Parameters are identified by type name; they are compared verbatim against the
/// methods of the contract a proxy is created for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Operation {
    name: String,
    params: Vec<String>,
}

impl Operation {
    pub fn new<P>(name: impl Into<String>, params: impl IntoIterator<Item = P>) -> Self
    where
        P: Into<String>,
    {
        Self {
            name: name.into(),
            params: params.into_iter().map(Into::into).collect(),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn params(&self) -> &[String] {
        &self.params
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.params.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::Operation;

    #[test]
    fn test_display() {
        let op = Operation::new("upload", ["String", "Bytes"]);
        assert_eq!("upload(String, Bytes)", op.to_string());
        assert_eq!("ping()", Operation::new("ping", Vec::<String>::new()).to_string());
    }
}
