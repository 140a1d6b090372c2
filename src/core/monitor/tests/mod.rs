mod session;
mod transitions;
