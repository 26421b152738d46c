// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! End-to-end breaker scenarios driven through the `fusebox` public API,
//! using the controlled clock behind the `test-util` feature.

#[cfg(test)]
mod breaker;
