// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Arithmetic operators on expressions
//!
//! Operators panic on incompatible shapes, the same way nalgebra's dynamic
//! matrices do. Use the `checked_*` constructors to handle shape errors.

use super::Expression;
use std::ops::{Add, Div, Mul, Neg, Sub};

macro_rules! binary_operator {
    ($trait:ident, $method:ident, $checked:ident) => {
        impl $trait<&Expression> for &Expression {
            type Output = Expression;

            fn $method(self, rhs: &Expression) -> Expression {
                match self.$checked(rhs) {
                    Ok(result) => result,
                    Err(err) => panic!("{}", err),
                }
            }
        }

        impl $trait<Expression> for Expression {
            type Output = Expression;

            fn $method(self, rhs: Expression) -> Expression {
                (&self).$method(&rhs)
            }
        }

        impl $trait<&Expression> for Expression {
            type Output = Expression;

            fn $method(self, rhs: &Expression) -> Expression {
                (&self).$method(rhs)
            }
        }

        impl $trait<Expression> for &Expression {
            type Output = Expression;

            fn $method(self, rhs: Expression) -> Expression {
                self.$method(&rhs)
            }
        }
    };
}

binary_operator!(Add, add, checked_add);
binary_operator!(Sub, sub, checked_sub);
binary_operator!(Mul, mul, checked_mul);
binary_operator!(Div, div, checked_div);

impl Neg for &Expression {
    type Output = Expression;

    fn neg(self) -> Expression {
        self.negated()
    }
}

impl Neg for Expression {
    type Output = Expression;

    fn neg(self) -> Expression {
        self.negated()
    }
}

impl Mul<f64> for &Expression {
    type Output = Expression;

    fn mul(self, scale: f64) -> Expression {
        self.scaled_by(scale)
    }
}

impl Mul<f64> for Expression {
    type Output = Expression;

    fn mul(self, scale: f64) -> Expression {
        self.scaled_by(scale)
    }
}

impl Mul<&Expression> for f64 {
    type Output = Expression;

    fn mul(self, expression: &Expression) -> Expression {
        expression.scaled_by(self)
    }
}

impl Mul<Expression> for f64 {
    type Output = Expression;

    fn mul(self, expression: Expression) -> Expression {
        expression.scaled_by(self)
    }
}

impl Div<f64> for &Expression {
    type Output = Expression;

    fn div(self, divisor: f64) -> Expression {
        let divisor = Expression::scalar(divisor, self.num_parameters());
        self / &divisor
    }
}

impl Div<f64> for Expression {
    type Output = Expression;

    fn div(self, divisor: f64) -> Expression {
        &self / divisor
    }
}
