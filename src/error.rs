use std::fmt::Display;

#[derive(Debug)]
pub enum ShapeshiftError {
    Input(String),
    Load(String),
    Format(String),
    MissingData(String),
    Solver(String),
}

impl Display for ShapeshiftError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (err_name, value) = match self {
            ShapeshiftError::Input(v) => ("Input", v),
            ShapeshiftError::Load(v) => ("Load", v),
            ShapeshiftError::Format(v) => ("Format", v),
            ShapeshiftError::MissingData(v) => ("Missing data", v),
            ShapeshiftError::Solver(v) => ("Solver", v),
        };

        write!(f, "{} error: {}", err_name, value)
    }
}
